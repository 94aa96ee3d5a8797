use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use media_engine::{
    DecodeEngine, DecodeSinks, DecodeTopology, EngineEvent, EngineFactory, EngineState,
    ResolvedSource, SinkSpec, resolve_source,
};
use media_types::{
    AtomicPipelineState, EngineError, MediaDuration, MediaSample, PipelineState, Pts, Result,
    Severity, SharedDiagnostics, StreamMetadata, TracingDiagnostics,
};

use crate::{IngestConfig, SampleQueue};

/// Upper bound on a single wait of the monitor thread, and on how long an
/// abort can take to be observed.
const MONITOR_INTERVAL: Duration = Duration::from_millis(50);

struct Inner {
    locator: String,
    config: IngestConfig,
    factory: Arc<dyn EngineFactory>,
    diagnostics: SharedDiagnostics,
    video: Arc<SampleQueue>,
    audio: Arc<SampleQueue>,
    engine: RwLock<Option<Arc<dyn DecodeEngine>>>,
    source: RwLock<Option<ResolvedSource>>,
    metadata: RwLock<StreamMetadata>,
    state: AtomicPipelineState,
    stop: AtomicBool,
    eof: AtomicBool,
    looping: AtomicBool,
    loop_start: AtomicI64,
    segment: AtomicU64,
    duration_known: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/**
    Owns one decode engine for a source locator.

    The engine delivers samples into a video and an audio [`SampleQueue`] from
    its own threads. A monitor thread drains the engine's status bus, handling
    end-of-stream (loop or flag EOF), errors and late duration updates.

    Every method is safe to call from the host thread: none of them wait on
    the engine except [`IngestAdapter::open`], [`IngestAdapter::reset`] and
    [`IngestAdapter::abort`], whose waits are bounded.
*/
pub struct IngestAdapter {
    inner: Arc<Inner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl IngestAdapter {
    /**
        Resolve `locator`, build and preroll its engine, and read back the
        stream geometry.

        # Errors

        - [`EngineError::InvalidSource`] if the locator cannot be resolved or
          the stream geometry is unusable
        - [`EngineError::InitFailed`] if the engine does not preroll in time
    */
    pub fn open(
        locator: &str,
        config: IngestConfig,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        Self::open_with_diagnostics(locator, config, factory, TracingDiagnostics::shared("ingest"))
    }

    pub fn open_with_diagnostics(
        locator: &str,
        config: IngestConfig,
        factory: Arc<dyn EngineFactory>,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            locator: locator.to_owned(),
            video: Arc::new(SampleQueue::new("video", config.video_capacity)),
            audio: Arc::new(SampleQueue::new("audio", config.audio_capacity)),
            looping: AtomicBool::new(config.looping),
            config,
            factory,
            diagnostics,
            engine: RwLock::new(None),
            source: RwLock::new(None),
            metadata: RwLock::new(StreamMetadata::default()),
            state: AtomicPipelineState::new(PipelineState::Uninitialized),
            stop: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            loop_start: AtomicI64::new(0),
            segment: AtomicU64::new(0),
            duration_known: AtomicBool::new(false),
            last_error: Mutex::new(None),
        });

        let engine = inner.launch()?;
        let adapter = Self {
            inner,
            monitor: Mutex::new(None),
        };
        if let Err(e) = adapter.spawn_monitor(engine) {
            adapter.inner.teardown();
            return Err(e);
        }
        Ok(adapter)
    }

    fn spawn_monitor(&self, engine: Arc<dyn DecodeEngine>) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("ingest-monitor".into())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| inner.monitor(engine.as_ref())));
                if result.is_err() {
                    tracing::error!(locator = %inner.locator, "ingest monitor panicked");
                    let _ = inner.state.transition(PipelineState::Error);
                }
            })?;
        *self.monitor.lock() = Some(handle);
        self.inner.diagnostics.tag(Severity::Info, "thread-start");
        Ok(())
    }

    fn join_monitor(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            if handle.join().is_err() {
                tracing::error!(locator = %self.inner.locator, "failed to join ingest monitor");
            }
        }
    }

    pub fn locator(&self) -> &str {
        &self.inner.locator
    }

    /**
        The source the locator resolved to, once opened.
    */
    pub fn source(&self) -> Option<ResolvedSource> {
        self.inner.source.read().clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner
            .source
            .read()
            .as_ref()
            .is_some_and(ResolvedSource::is_live)
    }

    pub fn metadata(&self) -> StreamMetadata {
        self.inner.metadata.read().clone()
    }

    pub fn state(&self) -> PipelineState {
        self.inner.state.load()
    }

    /**
        Start producing samples. A no-op when no engine is held.
    */
    pub fn start(&self) -> Result<()> {
        self.inner.set_running(EngineState::Playing, PipelineState::Playing)
    }

    /**
        Stop producing samples, keeping the current position.
    */
    pub fn stop(&self) -> Result<()> {
        self.inner.set_running(EngineState::Paused, PipelineState::Paused)
    }

    /**
        Reposition the source.

        Negative positions are clamped to zero. With `flush`, everything
        queued so far is released before the engine is told to seek, and
        samples produced before the seek are never returned afterwards.
        Completion is only observable through the timestamps of subsequent
        samples.
    */
    pub fn seek(&self, position: Pts, flush: bool) {
        let inner = &self.inner;
        let position = position.max(Pts::ZERO);
        let Some(engine) = inner.engine() else {
            return;
        };

        if flush {
            let dropped = inner.video.drain() + inner.audio.drain();
            tracing::trace!(dropped, "flushed ingest queues");
        }
        inner.diagnostics.tag(Severity::Info, "seek");

        match engine.seek(position, flush) {
            Ok(segment) => inner.segment.store(segment, Ordering::Release),
            Err(e) => {
                tracing::warn!(locator = %inner.locator, %position, error = %e, "seek failed");
            }
        }
        inner.eof.store(false, Ordering::Release);
    }

    pub fn try_pop_video(&self) -> Option<MediaSample> {
        self.inner.pop_current(&self.inner.video)
    }

    pub fn try_pop_audio(&self) -> Option<MediaSample> {
        self.inner.pop_current(&self.inner.audio)
    }

    /**
        Number of samples currently queued, as `(video, audio)`.
    */
    pub fn queued(&self) -> (usize, usize) {
        (self.inner.video.len(), self.inner.audio.len())
    }

    /**
        True once the engine reported end-of-stream and looping is off.
    */
    pub fn eof(&self) -> bool {
        self.inner.eof.load(Ordering::Acquire) && !self.inner.looping.load(Ordering::Acquire)
    }

    pub fn set_loop(&self, looping: bool) {
        self.inner.looping.store(looping, Ordering::Release);
    }

    pub fn is_looping(&self) -> bool {
        self.inner.looping.load(Ordering::Acquire)
    }

    /**
        Where the source restarts when it loops at end-of-stream.
    */
    pub fn set_loop_start(&self, position: Pts) {
        self.inner
            .loop_start
            .store(position.max(Pts::ZERO).0, Ordering::Release);
    }

    pub fn position(&self) -> Option<Pts> {
        self.inner.engine().and_then(|engine| engine.query_position())
    }

    pub fn duration(&self) -> Option<MediaDuration> {
        self.inner.metadata.read().duration
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /**
        Stop the engine and the monitor thread and release all queued samples.

        Idempotent. The adapter cannot be used afterwards.
    */
    pub fn abort(&self) {
        let inner = &self.inner;
        if inner.state.load() == PipelineState::Aborted {
            return;
        }
        inner.stop.store(true, Ordering::Release);
        let _ = inner.state.transition(PipelineState::Aborted);
        self.join_monitor();
        inner.teardown();
        tracing::debug!(locator = %inner.locator, "ingest aborted");
    }

    /**
        Tear the engine down and open the same locator again.

        Used to recover from engine errors. Metadata is derived afresh.
    */
    pub fn reset(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state.load() == PipelineState::Aborted {
            return Err(EngineError::runtime("ingest adapter was aborted"));
        }

        inner.stop.store(true, Ordering::Release);
        self.join_monitor();
        inner.teardown();

        inner.segment.store(0, Ordering::Release);
        inner.eof.store(false, Ordering::Release);
        inner.duration_known.store(false, Ordering::Release);
        *inner.last_error.lock() = None;
        if inner.state.reset().is_err() {
            return Err(EngineError::runtime("ingest adapter was aborted"));
        }
        inner.stop.store(false, Ordering::Release);

        tracing::info!(locator = %inner.locator, "resetting ingest");
        let engine = inner.launch()?;
        self.spawn_monitor(engine)
    }
}

impl Drop for IngestAdapter {
    fn drop(&mut self) {
        self.abort();
    }
}

impl Inner {
    fn engine(&self) -> Option<Arc<dyn DecodeEngine>> {
        self.engine.read().clone()
    }

    fn launch(&self) -> Result<Arc<dyn DecodeEngine>> {
        let source = resolve_source(&self.locator, self.config.media_root.as_deref())?;
        tracing::debug!(locator = %self.locator, uri = %source, "resolved source");

        let topology = DecodeTopology::for_source(source.clone())
            .with_filter(self.config.filter.clone())
            .with_scale_mode(self.config.scale_mode)
            .with_sinks(
                SinkSpec::video().with_capacity(self.video.capacity()),
                SinkSpec::audio().with_capacity(self.audio.capacity()),
            );
        let sinks = DecodeSinks {
            video: self.video.clone(),
            audio: self.audio.clone(),
        };
        let engine = self.factory.open_decoder(&topology, sinks)?;

        let prerolled = engine
            .set_state(EngineState::Paused)
            .and_then(|()| engine.wait_for_state(EngineState::Paused, self.config.open_timeout()));
        if let Err(e) = prerolled {
            let _ = engine.set_state(EngineState::Null);
            return Err(match e {
                EngineError::InitFailed { .. } | EngineError::InvalidSource { .. } => e,
                other => EngineError::init_failed(other.to_string()),
            });
        }

        let (video, audio) = engine.stream_info();
        let metadata = video
            .map(|video| StreamMetadata::new(video, audio, engine.query_duration()))
            .filter(StreamMetadata::is_valid_geometry);
        let Some(metadata) = metadata else {
            let _ = engine.set_state(EngineState::Null);
            return Err(EngineError::invalid_source(
                &self.locator,
                "unsupported stream geometry",
            ));
        };

        tracing::info!(
            locator = %self.locator,
            width = metadata.width,
            height = metadata.height,
            channels = metadata.channels,
            sample_rate = metadata.sample_rate,
            duration = ?metadata.duration.map(|d| d.as_secs_f64()),
            "opened source"
        );

        self.duration_known
            .store(metadata.duration.is_some(), Ordering::Release);
        *self.metadata.write() = metadata;
        *self.source.write() = Some(source);
        *self.engine.write() = Some(Arc::clone(&engine));
        let _ = self.state.transition(PipelineState::Paused);
        Ok(engine)
    }

    /**
        Move the engine to null and release every queued sample.
    */
    fn teardown(&self) {
        if let Some(engine) = self.engine.write().take() {
            if let Err(e) = engine.set_state(EngineState::Null) {
                tracing::warn!(locator = %self.locator, error = %e, "failed to stop engine");
            }
        }
        self.video.drain();
        self.audio.drain();
    }

    fn set_running(&self, engine_state: EngineState, state: PipelineState) -> Result<()> {
        let Some(engine) = self.engine() else {
            return Ok(());
        };
        engine.set_state(engine_state)?;
        if let Err(current) = self.state.transition(state) {
            tracing::debug!(locator = %self.locator, %current, requested = %state, "state change ignored");
        }
        Ok(())
    }

    fn pop_current(&self, queue: &SampleQueue) -> Option<MediaSample> {
        let segment = self.segment.load(Ordering::Acquire);
        while let Some(sample) = queue.try_pop() {
            if sample.segment() >= segment {
                return Some(sample);
            }
            tracing::trace!(queue = queue.name(), pts = %sample.pts(), "discarding sample from before flush");
        }
        None
    }

    fn monitor(&self, engine: &dyn DecodeEngine) {
        tracing::trace!(locator = %self.locator, "ingest monitor started");
        while !self.stop.load(Ordering::Acquire) {
            if let Some(event) = engine.bus().timed_pop(MONITOR_INTERVAL) {
                self.handle_event(engine, event);
            }
        }
        tracing::trace!(locator = %self.locator, "ingest monitor exiting");
    }

    fn handle_event(&self, engine: &dyn DecodeEngine, event: EngineEvent) {
        match event {
            EngineEvent::Eos { segment } if segment < self.segment.load(Ordering::Acquire) => {
                tracing::trace!(locator = %self.locator, segment, "ignoring end of stream from before flush");
            }
            EngineEvent::Eos { .. } => {
                if self.looping.load(Ordering::Acquire) {
                    let start = Pts(self.loop_start.load(Ordering::Acquire));
                    tracing::debug!(locator = %self.locator, %start, "end of stream, looping");
                    match engine.seek(start, false) {
                        Ok(_) => self.diagnostics.tag(Severity::Info, "seek"),
                        Err(e) => tracing::warn!(locator = %self.locator, error = %e, "loop seek failed"),
                    }
                } else {
                    tracing::debug!(locator = %self.locator, "end of stream");
                    self.eof.store(true, Ordering::Release);
                }
            }
            EngineEvent::Error { message, debug: details } => {
                tracing::error!(locator = %self.locator, %message, details = ?details, "engine error");
                self.diagnostics.tag(Severity::Error, "input");
                *self.last_error.lock() = Some(message);
                let _ = self.state.transition(PipelineState::Error);
            }
            EngineEvent::Warning { message } => {
                tracing::warn!(locator = %self.locator, %message, "engine warning");
            }
            EngineEvent::StateChanged { old, new } => {
                tracing::trace!(locator = %self.locator, %old, %new, "engine state changed");
                if new == EngineState::Playing {
                    self.query_duration(engine);
                }
            }
            EngineEvent::DurationChanged => self.query_duration(engine),
        }
    }

    /**
        Fill in the duration if it was unknown when the source was opened.
    */
    fn query_duration(&self, engine: &dyn DecodeEngine) {
        if self.duration_known.load(Ordering::Acquire) {
            return;
        }
        if let Some(duration) = engine.query_duration() {
            self.duration_known.store(true, Ordering::Release);
            self.metadata.write().duration = Some(duration);
            tracing::debug!(locator = %self.locator, duration = duration.as_secs_f64(), "duration known");
        }
    }
}

static_assertions::assert_impl_all!(IngestAdapter: Send, Sync);
