use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError, bounded,
};
use parking_lot::Mutex;

use media_engine::{EncodeEngine, EngineEvent, EngineFactory, EngineState};
use media_types::{
    AtomicPipelineState, Debounce, EngineError, HostFrame, PipelineState, Rational, Result,
    Severity, SharedDiagnostics, TracingDiagnostics, VideoFormat,
};

use crate::{EgressConfig, EgressOptions, SampleStamper};

/// Upper bound on a single wait of the egress thread or a blocked `submit`,
/// and on how long an abort can take to be observed.
const EGRESS_INTERVAL: Duration = Duration::from_millis(50);
/// How long the egress thread waits for the engine to finalize its output.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

enum Message {
    Frame(HostFrame),
    /// No more frames follow.
    EndOfStream,
}

struct Inner {
    destination: String,
    realtime: bool,
    frame_rate: Rational,
    engine: Arc<dyn EncodeEngine>,
    diagnostics: SharedDiagnostics,
    state: AtomicPipelineState,
    abort: AtomicBool,
    finishing: AtomicBool,
    finalized: AtomicBool,
    submitted: AtomicU64,
    encoded: AtomicU64,
    dropped: AtomicU64,
    drop_warning: Debounce,
    last_error: Mutex<Option<String>>,
}

/**
    Feeds host frames into one encode engine.

    Frames are queued to an egress thread that restamps them from a frame
    counter and pushes them into the engine. In realtime mode the queue holds
    a single frame and `submit` drops frames the encoder has no room for; in
    file mode the queue is deeper and `submit` blocks until there is room.

    Engine errors stop encoding. The adapter stays alive but stops accepting
    frames until it is dropped.
*/
pub struct EgressAdapter {
    inner: Arc<Inner>,
    tx: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EgressAdapter {
    /**
        Select the encode topology for `config`, open its engine and start
        the egress thread.

        # Errors

        - [`EngineError::InvalidSource`] if the destination cannot be written to
        - [`EngineError::InitFailed`] if the engine does not start
    */
    pub fn open(
        config: &EgressConfig,
        format: &VideoFormat,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        Self::open_with_diagnostics(config, format, factory, TracingDiagnostics::shared("egress"))
    }

    /**
        Open with an option string such as `-codec:v vp9 -bitrate:v 5000`
        applied over the default configuration.
    */
    pub fn open_with_options(
        destination: &str,
        options: &str,
        format: &VideoFormat,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        let options = EgressOptions::parse(options)
            .map_err(|e| EngineError::invalid_source(destination, e.to_string()))?;
        let config = EgressConfig::new(destination).with_options(options);
        Self::open(&config, format, factory)
    }

    pub fn open_with_diagnostics(
        config: &EgressConfig,
        format: &VideoFormat,
        factory: Arc<dyn EngineFactory>,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self> {
        let topology = config.topology(format)?;
        let realtime = config.is_realtime(&topology);
        let engine = factory.open_encoder(&topology)?;
        if let Err(e) = engine.set_state(EngineState::Playing) {
            let _ = engine.set_state(EngineState::Null);
            return Err(EngineError::init_failed(e.to_string()));
        }

        tracing::info!(
            destination = %topology.destination,
            container = %topology.container,
            codec = %topology.video_codec,
            realtime,
            "egress opened"
        );

        let inner = Arc::new(Inner {
            destination: config.destination.clone(),
            realtime,
            frame_rate: format.frame_rate,
            engine,
            diagnostics,
            state: AtomicPipelineState::new(PipelineState::Playing),
            abort: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            encoded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drop_warning: Debounce::new(1, 25),
            last_error: Mutex::new(None),
        });

        let (tx, rx) = bounded(EgressConfig::queue_capacity(realtime));
        let thread_inner = Arc::clone(&inner);
        let spawned = thread::Builder::new()
            .name("egress".into())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| thread_inner.run(&rx)));
                if result.is_err() {
                    tracing::error!(destination = %thread_inner.destination, "egress thread panicked");
                    let _ = thread_inner.state.transition(PipelineState::Error);
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = inner.engine.set_state(EngineState::Null);
                return Err(e.into());
            }
        };
        inner.diagnostics.tag(Severity::Info, "thread-start");

        Ok(Self {
            inner,
            tx,
            thread: Mutex::new(Some(handle)),
        })
    }

    /**
        Hand a frame to the encoder.

        In realtime mode this never blocks: a frame that does not fit is
        dropped and counted. In file mode this blocks until the frame is
        queued or the adapter stops accepting frames.

        Returns whether the adapter is still accepting frames.
    */
    pub fn submit(&self, frame: HostFrame) -> bool {
        let inner = &self.inner;
        if !inner.is_accepting() {
            return false;
        }

        if inner.realtime {
            match self.tx.try_send(Message::Frame(frame)) {
                Ok(()) => {
                    inner.submitted.fetch_add(1, Ordering::AcqRel);
                }
                Err(TrySendError::Full(_)) => inner.drop_frame(),
                Err(TrySendError::Disconnected(_)) => return false,
            }
        } else {
            let mut message = Message::Frame(frame);
            loop {
                match self.tx.send_timeout(message, EGRESS_INTERVAL) {
                    Ok(()) => {
                        inner.submitted.fetch_add(1, Ordering::AcqRel);
                        break;
                    }
                    Err(SendTimeoutError::Timeout(rejected)) => {
                        if !inner.is_accepting() {
                            return false;
                        }
                        message = rejected;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return false,
                }
            }
        }

        inner.is_accepting()
    }

    /**
        Flush every queued frame, finalize the output and stop the egress
        thread.

        Blocks until the engine reports the output finalized, or gives up
        after a bounded wait.
    */
    pub fn finish(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.finishing.swap(true, Ordering::AcqRel) {
            let mut message = Message::EndOfStream;
            loop {
                match self.tx.send_timeout(message, EGRESS_INTERVAL) {
                    Ok(()) | Err(SendTimeoutError::Disconnected(_)) => break,
                    Err(SendTimeoutError::Timeout(rejected)) => {
                        if self.thread_finished() {
                            break;
                        }
                        message = rejected;
                    }
                }
            }
        }
        self.join();

        let failed = inner.state.load() == PipelineState::Error;
        if inner.finalized.load(Ordering::Acquire) && !failed {
            Ok(())
        } else {
            let message = inner
                .last_error
                .lock()
                .clone()
                .unwrap_or_else(|| "output was not finalized".to_owned());
            Err(EngineError::runtime(message))
        }
    }

    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    pub fn is_realtime(&self) -> bool {
        self.inner.realtime
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.is_accepting()
    }

    pub fn state(&self) -> PipelineState {
        self.inner.state.load()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Frames accepted into the queue.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Acquire)
    }

    /// Frames pushed into the engine.
    pub fn encoded(&self) -> u64 {
        self.inner.encoded.load(Ordering::Acquire)
    }

    /// Frames dropped because the realtime queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Whether the engine reported its output finalized.
    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::Acquire)
    }

    fn thread_finished(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(destination = %self.inner.destination, "failed to join egress thread");
            }
        }
    }
}

impl Drop for EgressAdapter {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.abort.store(true, Ordering::Release);
        if !inner.finishing.swap(true, Ordering::AcqRel) {
            // A full queue is drained by the thread once it sees the abort flag
            let _ = self.tx.try_send(Message::EndOfStream);
        }
        self.join();
        if let Err(e) = inner.engine.set_state(EngineState::Null) {
            tracing::warn!(destination = %inner.destination, error = %e, "failed to stop encoder");
        }
        let _ = inner.state.transition(PipelineState::Aborted);
        tracing::debug!(
            destination = %inner.destination,
            encoded = inner.encoded.load(Ordering::Acquire),
            dropped = inner.dropped.load(Ordering::Acquire),
            "egress closed"
        );
    }
}

static_assertions::assert_impl_all!(EgressAdapter: Send, Sync);

impl Inner {
    fn is_accepting(&self) -> bool {
        !self.abort.load(Ordering::Acquire)
            && !self.finishing.load(Ordering::Acquire)
            && self.state.load().is_running()
    }

    fn drop_frame(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::AcqRel) + 1;
        if self.drop_warning.hit() {
            tracing::warn!(destination = %self.destination, dropped, "encoder behind, dropping frames");
            self.diagnostics.tag(Severity::Warning, "dropped-frame");
        }
    }

    fn run(&self, rx: &Receiver<Message>) {
        tracing::trace!(destination = %self.destination, "egress thread started");
        let mut stamper = SampleStamper::new(self.frame_rate);

        loop {
            self.drain_events();
            match rx.recv_timeout(EGRESS_INTERVAL) {
                Ok(Message::Frame(frame)) => {
                    if self.abort.load(Ordering::Acquire) || !self.state.load().is_running() {
                        continue;
                    }
                    self.encode(&mut stamper, &frame);
                    self.diagnostics.set_value("buffer", rx.len() as f64);
                }
                Ok(Message::EndOfStream) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if self.abort.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.finalize();
        tracing::trace!(destination = %self.destination, "egress thread exiting");
    }

    fn encode(&self, stamper: &mut SampleStamper, frame: &HostFrame) {
        for sample in stamper.convert(frame) {
            if let Err(e) = self.engine.push_sample(sample) {
                self.fail(e.to_string());
                return;
            }
        }
        self.encoded.fetch_add(1, Ordering::AcqRel);
    }

    /**
        Signal end of stream and wait for the engine to finalize its output.
    */
    fn finalize(&self) {
        if let Err(e) = self.engine.end_of_stream() {
            tracing::warn!(destination = %self.destination, error = %e, "end of stream failed");
            return;
        }
        let deadline = Instant::now() + FINALIZE_TIMEOUT;
        while !self.finalized.load(Ordering::Acquire) && Instant::now() < deadline {
            match self.engine.bus().timed_pop(EGRESS_INTERVAL) {
                Some(event) => self.handle_event(event),
                None => {
                    if self.state.load() == PipelineState::Error {
                        break;
                    }
                }
            }
        }
        if !self.finalized.load(Ordering::Acquire) {
            tracing::warn!(destination = %self.destination, "output was not finalized");
        }
    }

    fn drain_events(&self) {
        while let Some(event) = self.engine.bus().try_pop() {
            self.handle_event(event);
        }
    }

    fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Eos { .. } => {
                tracing::debug!(destination = %self.destination, "output finalized");
                self.finalized.store(true, Ordering::Release);
            }
            EngineEvent::Error { message, debug: details } => {
                tracing::debug!(destination = %self.destination, details = ?details, "engine error details");
                self.fail(message);
            }
            EngineEvent::Warning { message } => {
                tracing::warn!(destination = %self.destination, %message, "engine warning");
            }
            EngineEvent::StateChanged { old, new } => {
                tracing::trace!(destination = %self.destination, %old, %new, "engine state changed");
            }
            EngineEvent::DurationChanged => {}
        }
    }

    /**
        Record an engine failure and stop encoding. Only the first failure is
        logged and tagged.
    */
    fn fail(&self, message: String) {
        let first = self
            .state
            .transition(PipelineState::Error)
            .is_ok_and(|previous| previous != PipelineState::Error);
        if first {
            tracing::error!(destination = %self.destination, %message, "encoder error");
            self.diagnostics.tag(Severity::Error, "output");
        }
        self.last_error.lock().get_or_insert(message);
    }
}
