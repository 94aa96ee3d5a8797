/*!
    Engine capability traits.
*/

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use media_types::{
    AudioStreamInfo, EngineError, MediaDuration, MediaSample, Pts, Result, VideoStreamInfo,
};

use crate::EventBus;

/**
    Engine-level state, independent of the adapter's [`media_types::PipelineState`].
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    /// Torn down. No threads, no buffers.
    Null,
    /// Resources allocated, nothing flowing.
    Ready,
    /// Negotiated and prerolled, not advancing.
    Paused,
    Playing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

/**
    Destination for samples produced on an engine thread.

    Implementations must never block. A rejected sample is handed back to the
    caller, which keeps ownership of it and decides whether to retry or drop it.
*/
pub trait SampleSink: Send + Sync {
    fn try_push(&self, sample: MediaSample) -> std::result::Result<(), MediaSample>;
}

/**
    The two sinks a decode engine delivers into.
*/
#[derive(Clone)]
pub struct DecodeSinks {
    pub video: Arc<dyn SampleSink>,
    pub audio: Arc<dyn SampleSink>,
}

impl fmt::Debug for DecodeSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSinks").finish_non_exhaustive()
    }
}

/**
    An asynchronous decode engine.

    State changes are asynchronous: `set_state` requests a state and returns,
    and completion is announced on the bus. Samples are pushed into the
    [`DecodeSinks`] the engine was opened with, from the engine's own threads.
*/
pub trait DecodeEngine: Send + Sync {
    fn set_state(&self, state: EngineState) -> Result<()>;

    /**
        Block for up to `timeout` until the engine settles in `state`.

        Fails with [`EngineError::InitFailed`] if the engine reported an error
        while transitioning or did not settle in time.
    */
    fn wait_for_state(&self, state: EngineState, timeout: Duration) -> Result<()>;

    /**
        Reposition the engine. With `flush`, samples that are in flight inside
        the engine are discarded and the returned flush segment increases.
    */
    fn seek(&self, position: Pts, flush: bool) -> Result<u64>;

    /**
        Negotiated stream geometry. Available once the engine has prerolled.
    */
    fn stream_info(&self) -> (Option<VideoStreamInfo>, Option<AudioStreamInfo>);

    /// `None` while unknown or for live sources.
    fn query_duration(&self) -> Option<MediaDuration>;

    fn query_position(&self) -> Option<Pts>;

    fn bus(&self) -> &EventBus;
}

/**
    An asynchronous encode engine.
*/
pub trait EncodeEngine: Send + Sync {
    fn set_state(&self, state: EngineState) -> Result<()>;

    /**
        Queue one sample for encoding. May block while the engine is busy.
    */
    fn push_sample(&self, sample: MediaSample) -> Result<()>;

    /**
        Signal that no more samples follow. The engine posts
        [`crate::EngineEvent::Eos`] once the output is finalized.
    */
    fn end_of_stream(&self) -> Result<()>;

    fn bus(&self) -> &EventBus;
}

/**
    Builds engine instances for topologies.
*/
pub trait EngineFactory: Send + Sync {
    fn open_decoder(
        &self,
        topology: &crate::DecodeTopology,
        sinks: DecodeSinks,
    ) -> Result<Arc<dyn DecodeEngine>>;

    fn open_encoder(&self, topology: &crate::EncodeTopology) -> Result<Arc<dyn EncodeEngine>>;
}

pub(crate) fn no_engine_for(locator: &str) -> EngineError {
    EngineError::invalid_source(locator, "no media engine available for this locator")
}

/**
    Outcome of handing a sample to a sink from an engine thread.
*/
pub(crate) enum Delivery {
    Delivered,
    /// The sink was full and the sample was discarded.
    Dropped,
    /// A flush or shutdown happened while waiting for room.
    Cancelled,
}

/**
    Push `sample` into `sink`, either dropping it (`leaky`) or retrying every
    `retry` until the sink accepts it or `cancelled` returns true.
*/
pub(crate) fn deliver(
    sink: &dyn SampleSink,
    sample: MediaSample,
    leaky: bool,
    retry: Duration,
    cancelled: impl Fn() -> bool,
) -> Delivery {
    let mut sample = sample;
    loop {
        match sink.try_push(sample) {
            Ok(()) => return Delivery::Delivered,
            Err(rejected) => {
                if leaky {
                    tracing::trace!(pts = %rejected.pts(), "sink full, dropping sample");
                    return Delivery::Dropped;
                }
                if cancelled() {
                    return Delivery::Cancelled;
                }
                sample = rejected;
                std::thread::sleep(retry);
            }
        }
    }
}
