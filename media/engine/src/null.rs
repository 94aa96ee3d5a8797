/*!
    Built-in encode engine that discards its input (`null://`).

    Records what it was given in [`EncoderStats`] so callers can verify timing
    and completeness. Query parameters: `delay_ms` (per-sample processing
    time, to simulate a slow encoder) and `fail_at` (post an error when that
    many video frames have been accepted).
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use media_types::{EngineError, MediaDuration, MediaSample, Pts, Result, SampleKind};

use crate::{EncodeEngine, EncodeTopology, EngineEvent, EngineState, EventBus};

/**
    Counters shared between a null encoder and whoever created it.
*/
#[derive(Debug, Default)]
pub struct EncoderStats {
    video_frames: AtomicU64,
    audio_blocks: AtomicU64,
    eos: AtomicBool,
    timestamps: Mutex<Vec<(Pts, MediaDuration)>>,
}

impl EncoderStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::Acquire)
    }

    pub fn audio_blocks(&self) -> u64 {
        self.audio_blocks.load(Ordering::Acquire)
    }

    pub fn eos_received(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    /**
        Timing of every accepted video frame, in arrival order.
    */
    pub fn video_timestamps(&self) -> Vec<(Pts, MediaDuration)> {
        self.timestamps.lock().clone()
    }
}

/**
    The `null://` encode engine.
*/
pub struct NullEncoder {
    stats: Arc<EncoderStats>,
    bus: EventBus,
    state: Mutex<EngineState>,
    delay: Option<Duration>,
    fail_at: Option<u64>,
}

impl NullEncoder {
    pub fn open(topology: &EncodeTopology, uri: &Url, stats: Arc<EncoderStats>) -> Result<Self> {
        let mut delay = None;
        let mut fail_at = None;
        for (key, value) in uri.query_pairs() {
            let parsed: u64 = value.parse().map_err(|_| {
                EngineError::invalid_source(uri.as_str(), format!("bad {key} '{value}'"))
            })?;
            match key.as_ref() {
                "delay_ms" => delay = Some(Duration::from_millis(parsed)),
                "fail_at" => fail_at = Some(parsed),
                other => tracing::debug!(parameter = other, "ignoring unknown null encoder parameter"),
            }
        }
        tracing::debug!(
            codec = %topology.video_codec,
            width = topology.width,
            height = topology.height,
            rate = %topology.frame_rate,
            "opening null encoder"
        );
        Ok(Self {
            stats,
            bus: EventBus::new(),
            state: Mutex::new(EngineState::Null),
            delay,
            fail_at,
        })
    }

    pub fn stats(&self) -> &Arc<EncoderStats> {
        &self.stats
    }
}

impl EncodeEngine for NullEncoder {
    fn set_state(&self, state: EngineState) -> Result<()> {
        let mut current = self.state.lock();
        if *current != state {
            self.bus.post(EngineEvent::StateChanged {
                old: *current,
                new: state,
            });
            *current = state;
        }
        Ok(())
    }

    fn push_sample(&self, sample: MediaSample) -> Result<()> {
        if *self.state.lock() < EngineState::Paused {
            return Err(EngineError::runtime("encoder is not running"));
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        match sample.kind() {
            SampleKind::Video => {
                let accepted = self.stats.video_frames.load(Ordering::Acquire);
                if self.fail_at.is_some_and(|limit| accepted >= limit) {
                    let message = format!("null encoder failed after {accepted} frames");
                    self.bus.post_error(message.clone());
                    return Err(EngineError::runtime(message));
                }
                self.stats
                    .timestamps
                    .lock()
                    .push((sample.pts(), sample.duration()));
                self.stats.video_frames.fetch_add(1, Ordering::AcqRel);
            }
            SampleKind::Audio => {
                self.stats.audio_blocks.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    fn end_of_stream(&self) -> Result<()> {
        self.stats.eos.store(true, Ordering::Release);
        self.bus.post(EngineEvent::Eos { segment: 0 });
        Ok(())
    }

    fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use media_types::{PixelFormat, VideoCodec};

    use super::*;
    use crate::EncodeRequest;

    fn open(destination: &str) -> NullEncoder {
        let topology = EncodeTopology::select(&EncodeRequest {
            destination,
            format: None,
            video_codec: VideoCodec::X264,
        })
        .unwrap();
        let uri = Url::parse(destination).unwrap();
        NullEncoder::open(&topology, &uri, EncoderStats::new()).unwrap()
    }

    fn frame(n: i64) -> MediaSample {
        MediaSample::video(
            vec![0u8; 4],
            1,
            1,
            PixelFormat::Bgra,
            Pts(n * 40_000),
            MediaDuration(40_000),
        )
    }

    #[test]
    fn records_frames_and_eos() {
        let encoder = open("null://");
        assert!(encoder.push_sample(frame(0)).is_err());

        encoder.set_state(EngineState::Playing).unwrap();
        encoder.push_sample(frame(0)).unwrap();
        encoder.push_sample(frame(1)).unwrap();
        encoder.end_of_stream().unwrap();

        let stats = encoder.stats();
        assert_eq!(stats.video_frames(), 2);
        assert!(stats.eos_received());
        assert_eq!(stats.video_timestamps()[1], (Pts(40_000), MediaDuration(40_000)));
    }

    #[test]
    fn fail_at_posts_error() {
        let encoder = open("null://?fail_at=1");
        encoder.set_state(EngineState::Playing).unwrap();
        encoder.push_sample(frame(0)).unwrap();
        assert!(encoder.push_sample(frame(1)).is_err());

        let mut saw_error = false;
        while let Some(event) = encoder.bus().try_pop() {
            saw_error |= matches!(event, EngineEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[test]
    fn bad_parameter_is_invalid() {
        let topology = EncodeTopology::select(&EncodeRequest {
            destination: "null://",
            format: None,
            video_codec: VideoCodec::X264,
        })
        .unwrap();
        let uri = Url::parse("null://?delay_ms=soon").unwrap();
        assert!(NullEncoder::open(&topology, &uri, EncoderStats::new()).is_err());
    }
}
