use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use media_engine::EngineFactory;
use media_ingest::{IngestAdapter, IngestConfig};
use media_types::{
    Debounce, Field, HostFrame, MediaDuration, MediaSample, PipelineState, Pts, Result, ScaleMode,
    Severity, SharedDiagnostics, TracingDiagnostics, VideoFormat,
};

use crate::lookahead::{BufferedFrame, LookaheadBuffer};
use crate::status::AtomicPlayhead;
use crate::{
    ClipWindow, FrameFactory, PlayWindow, PlaybackConfig, PlaybackStatus, PlayheadState,
    ProducerParams, SeekRequest,
};

/// Sleep while idling at the end of the window.
const IDLE_WAIT: Duration = Duration::from_millis(10);
const SHORT_BACKOFF: Duration = Duration::from_millis(5);
const LONG_BACKOFF: Duration = Duration::from_millis(20);
/// Misses after which the producer switches to the long backoff.
const LONG_BACKOFF_AFTER: u64 = 25;

/**
    Result of a per-field pull.
*/
#[derive(Debug, Clone)]
pub enum FramePull {
    /// A new frame, popped from the lookahead buffer.
    Fresh(HostFrame),
    /// The previous frame again, because the field belongs to it or the
    /// play window has ended.
    Held(HostFrame),
    /// Nothing was ready. Carries the frame to repeat.
    Underflow(HostFrame),
}

impl FramePull {
    pub fn frame(&self) -> &HostFrame {
        match self {
            Self::Fresh(frame) | Self::Held(frame) | Self::Underflow(frame) => frame,
        }
    }

    pub fn into_frame(self) -> HostFrame {
        match self {
            Self::Fresh(frame) | Self::Held(frame) | Self::Underflow(frame) => frame,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn is_underflow(&self) -> bool {
        matches!(self, Self::Underflow(_))
    }
}

/// Host-side view of what is on screen.
#[derive(Debug)]
struct Held {
    frame: Option<HostFrame>,
    /// Play-head position, advanced while a frame is held.
    time: Pts,
    /// Set by a seek until the first post-seek frame is shown.
    flushing: bool,
    underflows: u64,
    frames_shown: u64,
}

impl Held {
    fn hold(&mut self, by: MediaDuration, end: Option<Pts>) {
        let next = self.time.saturating_add(by);
        self.time = end.map_or(next, |end| next.min(end));
    }
}

/// Scheduler-thread state. Never touched by the host.
struct Producer {
    last_end: Option<Pts>,
    /// Frames pushed since the last seek or loop.
    run: u64,
    sequence: u64,
    pending_audio: Option<MediaSample>,
    backoff: Debounce,
}

impl Producer {
    fn new() -> Self {
        Self {
            last_end: None,
            run: 0,
            sequence: 0,
            pending_audio: None,
            backoff: Debounce::new(100, 500),
        }
    }

    fn restart(&mut self, reset_sequence: bool) {
        self.last_end = None;
        self.run = 0;
        self.pending_audio = None;
        if reset_sequence {
            self.sequence = 0;
        }
    }
}

struct Shared {
    ingest: IngestAdapter,
    window: PlayWindow,
    seek: SeekRequest,
    buffer: LookaheadBuffer,
    factory: FrameFactory,
    config: PlaybackConfig,
    diagnostics: SharedDiagnostics,
    playhead: AtomicPlayhead,
    held: Mutex<Held>,
    source_end: AtomicBool,
    stop: AtomicBool,
    exited: AtomicBool,
}

/**
    Turns the sample flow of an [`IngestAdapter`] into a field-accurate
    frame stream for a host running at a fixed output rate.

    A scheduler thread pops decoded video, applies the play window and
    pending seeks, converts samples to host frames and fills a small
    lookahead buffer. The host calls [`PlaybackScheduler::advance_frame`]
    once per output field; that call never blocks on the source and always
    yields a frame, repeating the last one when nothing new is ready.
*/
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    /**
        Open `params.locator` and start scheduling it.

        # Errors

        Fails like [`IngestAdapter::open`]; nothing keeps running on failure.
    */
    pub fn open(
        params: &ProducerParams,
        config: PlaybackConfig,
        ingest: IngestConfig,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        Self::open_with_diagnostics(
            params,
            config,
            ingest,
            factory,
            TracingDiagnostics::shared("playback"),
        )
    }

    pub fn open_with_diagnostics(
        params: &ProducerParams,
        config: PlaybackConfig,
        ingest: IngestConfig,
        factory: Arc<dyn EngineFactory>,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self> {
        let filter = params.filter.clone().or(ingest.filter.clone());
        let ingest_config = ingest
            .with_filter(filter)
            .with_scale_mode(params.scale_mode)
            .with_loop(false);
        let adapter = IngestAdapter::open_with_diagnostics(
            &params.locator,
            ingest_config,
            factory,
            diagnostics.clone(),
        )?;
        let clip = params.clip(&config.format);
        Self::start(adapter, clip, config, params.scale_mode, diagnostics)
    }

    /**
        Start scheduling an already opened ingest adapter.

        The scheduler owns looping, so the adapter's own loop flag is cleared.
    */
    pub fn start(
        ingest: IngestAdapter,
        clip: ClipWindow,
        config: PlaybackConfig,
        scale_mode: ScaleMode,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self> {
        ingest.set_loop(false);

        let seek = SeekRequest::new();
        if clip.seek > Pts::ZERO {
            seek.request(clip.seek);
        }

        let shared = Arc::new(Shared {
            window: PlayWindow::new(clip.start, clip.duration, clip.looping),
            seek,
            buffer: LookaheadBuffer::new(config.lookahead_capacity()),
            factory: FrameFactory::new(config.format.clone(), scale_mode),
            held: Mutex::new(Held {
                frame: None,
                time: clip.seek.max(clip.start),
                flushing: true,
                underflows: 0,
                frames_shown: 0,
            }),
            config,
            diagnostics,
            playhead: AtomicPlayhead::default(),
            source_end: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            ingest,
        });

        shared.ingest.start()?;

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("playback-scheduler".into())
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| shared.run()));
                    if result.is_err() {
                        tracing::error!(
                            locator = shared.ingest.locator(),
                            "playback scheduler panicked"
                        );
                    }
                    shared.exited.store(true, Ordering::Release);
                })?
        };
        shared.diagnostics.tag(Severity::Info, "thread-start");

        tracing::debug!(
            locator = shared.ingest.locator(),
            start = %clip.start,
            duration = clip.duration.0,
            looping = clip.looping,
            "playback started"
        );
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /**
        Pull the frame for the next output field.

        Field A may advance to a new frame, field B always repeats the frame
        field A established. In interlaced formats a buffered frame that
        starts on field B is skipped and reported as underflow.
    */
    pub fn advance_frame(&self, field: Field) -> FramePull {
        let shared = &self.shared;
        let mut held = shared.held.lock();
        if field == Field::B {
            return FramePull::Held(shared.current(&held));
        }

        let format = shared.factory.format();
        let mut frames = shared.buffer.lock();
        let empty = frames.is_empty();
        let at_end = shared.at_end(&held, empty);
        let shallow =
            held.flushing && frames.len() < shared.config.preroll_depth() && !at_end;

        if empty || shallow {
            drop(frames);
            if empty && at_end && !held.flushing && held.frame.is_some() {
                held.hold(format.frame_duration(), shared.window.end());
                return FramePull::Held(shared.current(&held));
            }
            return shared.underflow(&mut held);
        }

        let odd = frames.front().is_some_and(|head| head.sequence() % 2 == 1);
        let next = frames.pop_front();
        drop(frames);
        shared.buffer.notify();

        let Some(BufferedFrame { frame, sample }) = next else {
            return shared.underflow(&mut held);
        };
        drop(sample);

        if format.is_interlaced() && odd {
            tracing::trace!(sequence = frame.sequence, "skipping frame with field parity mismatch");
            return shared.underflow(&mut held);
        }

        if held.underflows > 0 {
            tracing::debug!(
                underflows = held.underflows,
                pts = %frame.pts,
                "frame delivered after underflow"
            );
            held.underflows = 0;
        }
        held.time = frame.pts;
        held.flushing = false;
        held.frames_shown += 1;
        held.frame = Some(frame.clone());
        shared.playhead.store(PlayheadState::Playing);
        FramePull::Fresh(frame)
    }

    /**
        The frame currently on screen, without advancing.

        While a seek is being flushed, the first buffered post-seek frame is
        shown as soon as it exists, so a paused host displays the new
        position.
    */
    pub fn peek_current_frame(&self, field: Field) -> HostFrame {
        let shared = &self.shared;
        let held = shared.held.lock();
        if field == Field::A && (held.flushing || held.frame.is_none()) {
            if let Some(head) = shared.buffer.lock().front() {
                return head.frame.clone();
            }
        }
        shared.current(&held)
    }

    /**
        Request a seek and discard everything buffered.

        Only the latest pending request is honored.
    */
    pub fn seek_to(&self, position: Pts) {
        let shared = &self.shared;
        let position = position.max(Pts::ZERO);
        shared.seek.request(position);
        let dropped = shared.buffer.clear();
        shared.source_end.store(false, Ordering::Release);

        let mut held = shared.held.lock();
        held.flushing = true;
        held.time = position;
        drop(held);

        shared.playhead.store(PlayheadState::Seeking);
        tracing::debug!(%position, dropped, "seek requested");
    }

    /**
        Tear down and reopen the source, then resume from the current position.
    */
    pub fn reset(&self) -> Result<()> {
        let position = self.position();
        self.shared.buffer.clear();
        self.shared.ingest.reset()?;
        self.shared.ingest.start()?;
        self.seek_to(position);
        Ok(())
    }

    /**
        True while the scheduler can deliver frames. A source error or a dead
        scheduler thread makes it permanently not ready until reset.
    */
    pub fn is_ready(&self) -> bool {
        let shared = &self.shared;
        if shared.exited.load(Ordering::Acquire)
            || shared.ingest.state() == PipelineState::Error
        {
            return false;
        }
        !shared.buffer.is_empty() || shared.held.lock().frame.is_some()
    }

    pub fn window(&self) -> &PlayWindow {
        &self.shared.window
    }

    pub fn ingest(&self) -> &IngestAdapter {
        &self.shared.ingest
    }

    pub fn format(&self) -> &VideoFormat {
        self.shared.factory.format()
    }

    pub fn playhead(&self) -> PlayheadState {
        self.shared.playhead.load()
    }

    /// Frames waiting in the lookahead buffer.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn position(&self) -> Pts {
        self.shared.held.lock().time
    }

    /**
        Length of what will play: the window if bounded, else the remainder
        of the source after the window start, else unbounded.
    */
    pub fn duration(&self) -> MediaDuration {
        let window = &self.shared.window;
        let duration = window.duration();
        if !duration.is_unbounded() {
            return duration;
        }
        self.file_duration()
            .map(|file| MediaDuration((file.0 - window.start().0).max(0)))
            .unwrap_or(MediaDuration::UNBOUNDED)
    }

    pub fn file_duration(&self) -> Option<MediaDuration> {
        self.shared.ingest.duration()
    }

    /**
        True once the source ended and looping is off.
    */
    pub fn eof(&self) -> bool {
        !self.shared.window.looping() && self.shared.ingest.eof()
    }

    /// Fresh frames delivered to the host.
    pub fn frame_number(&self) -> u64 {
        self.shared.held.lock().frames_shown
    }

    /**
        Frames in the window at the output rate. `u64::MAX` while looping,
        zero if the length is unknown.
    */
    pub fn nb_frames(&self) -> u64 {
        if self.shared.window.looping() {
            return u64::MAX;
        }
        let duration = self.duration();
        if duration.is_unbounded() {
            return 0;
        }
        let frame = self.format().frame_duration().0.max(1);
        (duration.0 / frame) as u64
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.ingest.last_error()
    }

    pub fn name(&self) -> String {
        self.shared
            .ingest
            .source()
            .map(|source| source.name())
            .unwrap_or_else(|| self.shared.ingest.locator().to_owned())
    }

    pub fn status(&self) -> PlaybackStatus {
        let window = &self.shared.window;
        let clip_duration = window.duration();
        PlaybackStatus {
            name: self.name(),
            path: self
                .shared
                .ingest
                .source()
                .map(|source| source.uri.to_string())
                .unwrap_or_else(|| self.shared.ingest.locator().to_owned()),
            looping: window.looping(),
            clip: (
                window.start().as_secs_f64(),
                seconds_or_unbounded(clip_duration),
            ),
            time: (
                self.position().as_secs_f64(),
                self.file_duration()
                    .map_or(-1.0, MediaDuration::as_secs_f64),
            ),
            playhead: self.playhead(),
            ready: self.is_ready(),
            last_error: self.last_error(),
        }
    }
}

fn seconds_or_unbounded(duration: MediaDuration) -> f64 {
    if duration.is_unbounded() {
        -1.0
    } else {
        duration.as_secs_f64()
    }
}

impl fmt::Display for PlaybackScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "media[{}|{:.4}/{:.4}]",
            self.name(),
            self.position().as_secs_f64(),
            seconds_or_unbounded(self.duration())
        )
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.buffer.notify();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("failed to join playback scheduler");
            }
        }
        self.shared.ingest.abort();
    }
}

static_assertions::assert_impl_all!(PlaybackScheduler: Send, Sync);

impl Shared {
    fn current(&self, held: &Held) -> HostFrame {
        held.frame.clone().unwrap_or_else(|| self.factory.black())
    }

    /**
        Whether an empty buffer means the window or source is over rather
        than a stall.
    */
    fn at_end(&self, held: &Held, buffer_empty: bool) -> bool {
        if self.source_end.load(Ordering::Acquire) {
            return true;
        }
        if held.flushing {
            return false;
        }
        let past_window = held
            .frame
            .as_ref()
            .zip(self.window.end())
            .is_some_and(|(frame, end)| frame.end() >= end);
        past_window || (buffer_empty && self.ingest.eof() && self.ingest.queued().0 == 0)
    }

    fn underflow(&self, held: &mut Held) -> FramePull {
        held.underflows += 1;
        self.diagnostics.tag(Severity::Info, "underflow");
        if held.flushing {
            self.playhead.store(PlayheadState::Buffering);
        } else {
            held.hold(self.factory.format().frame_duration(), self.window.end());
            self.playhead.store(PlayheadState::Underflow);
        }
        FramePull::Underflow(self.current(held))
    }

    fn run(&self) {
        let mut producer = Producer::new();
        while !self.stop.load(Ordering::Acquire) {
            let generation = self.buffer.generation();

            if let Some(position) = self.seek.take() {
                self.ingest.seek(position, true);
                producer.restart(true);
                self.source_end.store(false, Ordering::Release);
                self.playhead.store(PlayheadState::Seeking);
                continue;
            }

            let window_end = self.window.end();
            if producer
                .last_end
                .zip(window_end)
                .is_some_and(|(last, end)| last >= end)
            {
                self.end_reached(&mut producer);
                continue;
            }

            let Some(sample) = self.ingest.try_pop_video() else {
                if self.ingest.eof() {
                    self.end_reached(&mut producer);
                } else {
                    self.back_off(&producer);
                }
                continue;
            };
            producer.backoff.reset();
            self.produce(sample, generation, window_end, &mut producer);
        }
        tracing::trace!(locator = self.ingest.locator(), "playback scheduler exiting");
    }

    fn end_reached(&self, producer: &mut Producer) {
        self.source_end.store(true, Ordering::Release);
        if self.window.looping() && producer.run > self.config.min_loop_frames {
            let start = self.window.start();
            tracing::debug!(%start, frames = producer.run, "looping");
            self.ingest.seek(start, true);
            producer.restart(false);
            self.source_end.store(false, Ordering::Release);
            self.playhead.store(PlayheadState::Looping);
        } else {
            thread::sleep(IDLE_WAIT);
        }
    }

    fn back_off(&self, producer: &Producer) {
        if producer.backoff.hit() {
            tracing::warn!(
                locator = self.ingest.locator(),
                misses = producer.backoff.misses(),
                "waiting for video frame"
            );
        }
        let wait = if producer.backoff.misses() > LONG_BACKOFF_AFTER {
            LONG_BACKOFF
        } else {
            SHORT_BACKOFF
        };
        thread::sleep(wait);
    }

    fn produce(
        &self,
        sample: MediaSample,
        generation: u64,
        window_end: Option<Pts>,
        producer: &mut Producer,
    ) {
        let started = Instant::now();
        let sample_end = sample.end();

        if window_end.is_some_and(|end| sample.pts() >= end) {
            producer.last_end = Some(sample_end);
            self.take_audio(producer, sample_end);
            return;
        }
        if sample_end <= self.window.start() {
            self.take_audio(producer, sample_end);
            return;
        }

        let fields = self.factory.fields_spanned(sample.duration());
        let Some(mut frame) = self.factory.make_frame(&sample, producer.sequence) else {
            return;
        };
        frame.audio = self.take_audio(producer, frame.end());
        let frame_end = frame.end();
        self.diagnostics
            .set_value("frame-time", started.elapsed().as_secs_f64() * 1000.0);

        if self
            .buffer
            .push_wait(BufferedFrame { frame, sample }, generation, &self.stop)
        {
            producer.sequence += fields;
            producer.run += 1;
            producer.last_end = Some(frame_end);
            self.diagnostics.set_value("buffer", self.buffer.fill());
        }
    }

    /**
        Pop audio blocks that start before `until`. The first block past it
        is held back for the next frame.
    */
    fn take_audio(&self, producer: &mut Producer, until: Pts) -> Vec<MediaSample> {
        let mut audio = Vec::new();
        loop {
            let next = producer
                .pending_audio
                .take()
                .or_else(|| self.ingest.try_pop_audio());
            match next {
                Some(block) if block.pts() < until => audio.push(block),
                Some(block) => {
                    producer.pending_audio = Some(block);
                    break;
                }
                None => break,
            }
        }
        audio
    }
}
