/*!
    Built-in test pattern decode engine (`testsrc://`).

    Produces numbered BGRA frames and matching silent S32 stereo audio blocks
    on its own streaming thread, the same way a real decode engine would. The
    locator's query string configures it:

    | Parameter  | Default | Meaning |
    |------------|---------|---------|
    | `duration` | `10`    | Seconds of media. `0` means endless (live only). |
    | `fps`      | `25`    | Frame rate, integer or `num/den`. |
    | `width`    | `64`    | Frame width. |
    | `height`   | `36`    | Frame height. |
    | `audio`    | `true`  | Whether an audio stream exists. |
    | `live`     | `false` | Pace output against the wall clock and drop on full sinks. |
    | `fail`     | unset   | `init` never prerolls, `geometry` reports a 0x0 stream. |
    | `error_at` | unset   | Post an error and stall when this frame index is reached. |

    The first eight bytes of every frame hold its index as a little-endian
    `u64`; [`frame_index`] reads it back.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use url::Url;

use media_types::{
    AudioStreamInfo, Clock, EngineError, MediaDuration, MediaSample, PixelFormat, Pts, Rational,
    Result, VideoStreamInfo, WallClock,
};

use crate::engine::{Delivery, deliver};
use crate::{
    DecodeEngine, DecodeSinks, DecodeTopology, EngineEvent, EngineState, EventBus, SampleSink,
};

/// How long the streaming thread sleeps between retries on a full sink.
const RETRY_INTERVAL: Duration = Duration::from_millis(2);
/// Upper bound on any single wait of the streaming thread.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailMode {
    Init,
    Geometry,
}

/**
    Parsed `testsrc://` parameters.
*/
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticParams {
    /// `None` for an endless stream.
    pub duration: Option<MediaDuration>,
    pub fps: Rational,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub live: bool,
    pub error_at: Option<u64>,
    fail: Option<FailMode>,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            duration: Some(MediaDuration::from_secs_f64(10.0)),
            fps: Rational::new(25, 1),
            width: 64,
            height: 36,
            audio: true,
            live: false,
            error_at: None,
            fail: None,
        }
    }
}

impl SyntheticParams {
    pub fn from_uri(uri: &Url) -> Result<Self> {
        let invalid = |reason: String| EngineError::invalid_source(uri.as_str(), reason);
        let mut params = Self::default();

        for (key, value) in uri.query_pairs() {
            match key.as_ref() {
                "duration" => {
                    let seconds: f64 = value
                        .parse()
                        .map_err(|_| invalid(format!("bad duration '{value}'")))?;
                    params.duration = (seconds > 0.0).then(|| MediaDuration::from_secs_f64(seconds));
                }
                "fps" => params.fps = parse_rate(&value).ok_or_else(|| invalid(format!("bad fps '{value}'")))?,
                "width" => {
                    params.width = value
                        .parse()
                        .map_err(|_| invalid(format!("bad width '{value}'")))?
                }
                "height" => {
                    params.height = value
                        .parse()
                        .map_err(|_| invalid(format!("bad height '{value}'")))?
                }
                "audio" => params.audio = parse_bool(&value),
                "live" => params.live = parse_bool(&value),
                "error_at" => {
                    params.error_at = Some(
                        value
                            .parse()
                            .map_err(|_| invalid(format!("bad error_at '{value}'")))?,
                    )
                }
                "fail" => {
                    params.fail = match value.as_ref() {
                        "init" => Some(FailMode::Init),
                        "geometry" => Some(FailMode::Geometry),
                        other => return Err(invalid(format!("bad fail mode '{other}'"))),
                    }
                }
                other => tracing::debug!(parameter = other, "ignoring unknown testsrc parameter"),
            }
        }

        if params.duration.is_none() && !params.live {
            return Err(invalid("endless test sources must be live".to_owned()));
        }
        Ok(params)
    }

    /**
        Number of frames in the stream, or `None` if endless.
    */
    pub fn total_frames(&self) -> Option<u64> {
        self.duration.map(|duration| {
            let frames = duration.0 as i128 * self.fps.num as i128;
            let per = 1_000_000i128 * self.fps.den as i128;
            ((frames + per - 1) / per) as u64
        })
    }

    /**
        Presentation timestamp of frame `index`.
    */
    pub fn frame_pts(&self, index: u64) -> Pts {
        Pts(MediaDuration::frames(index as i64, self.fps).0)
    }

    /**
        Index of the frame showing at `position`.
    */
    pub fn frame_at(&self, position: Pts) -> u64 {
        if position.0 <= 0 {
            return 0;
        }
        let estimate = (position.0 as i128 * self.fps.num as i128
            / (1_000_000i128 * self.fps.den as i128)) as u64;
        if self.frame_pts(estimate + 1) <= position {
            estimate + 1
        } else {
            estimate
        }
    }

    fn audio_frames_before(&self, index: u64) -> u64 {
        (index as u128 * 48_000 * self.fps.den as u128 / self.fps.num as u128) as u64
    }
}

fn parse_rate(value: &str) -> Option<Rational> {
    let rate = match value.split_once('/') {
        Some((num, den)) => Rational::new(num.parse().ok()?, den.parse().ok().filter(|d| *d != 0)?),
        None => Rational::new(value.parse().ok()?, 1),
    };
    rate.is_positive().then_some(rate)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/**
    Read the frame index stamped into a synthetic video payload.
*/
pub fn frame_index(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[derive(Debug)]
struct Control {
    state: EngineState,
    target: EngineState,
    next_frame: u64,
    segment: u64,
    last_pts: Option<Pts>,
    eos_sent: bool,
    errored: bool,
    failed: Option<String>,
}

struct Shared {
    params: SyntheticParams,
    sinks: DecodeSinks,
    video_leaky: bool,
    audio_leaky: bool,
    bus: EventBus,
    control: Mutex<Control>,
    wake: Condvar,
    clock: WallClock,
    shutdown: AtomicBool,
    /// Mirrors `Control::segment` so pushes can notice a flush without locking.
    segment: AtomicU64,
}

/**
    The `testsrc://` decode engine.
*/
pub struct SyntheticDecoder {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticDecoder {
    pub fn open(topology: &DecodeTopology, sinks: DecodeSinks) -> Result<Self> {
        let params = SyntheticParams::from_uri(&topology.source.uri)?;
        tracing::debug!(?params, "opening test source");
        Ok(Self {
            shared: Arc::new(Shared {
                video_leaky: topology.video_sink.leaky && params.live,
                audio_leaky: topology.audio_sink.leaky && params.live,
                params,
                sinks,
                bus: EventBus::new(),
                control: Mutex::new(Control {
                    state: EngineState::Null,
                    target: EngineState::Null,
                    next_frame: 0,
                    segment: 0,
                    last_pts: None,
                    eos_sent: false,
                    errored: false,
                    failed: None,
                }),
                wake: Condvar::new(),
                clock: WallClock::new(),
                shutdown: AtomicBool::new(false),
                segment: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn params(&self) -> &SyntheticParams {
        &self.shared.params
    }

    fn spawn_streaming_thread(&self) -> Result<()> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("testsrc-stream".into())
            .spawn(move || shared.run())?;
        *slot = Some(handle);
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("test source streaming thread panicked");
            }
        }
    }
}

impl DecodeEngine for SyntheticDecoder {
    fn set_state(&self, state: EngineState) -> Result<()> {
        if state == EngineState::Null {
            self.shutdown();
            let mut ctl = self.shared.control.lock();
            let old = ctl.state;
            ctl.state = EngineState::Null;
            ctl.target = EngineState::Null;
            if old != EngineState::Null {
                self.shared.bus.post(EngineEvent::StateChanged {
                    old,
                    new: EngineState::Null,
                });
            }
            return Ok(());
        }

        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(EngineError::runtime("engine has been shut down"));
        }

        {
            let mut ctl = self.shared.control.lock();
            if ctl.state == EngineState::Null {
                ctl.state = EngineState::Ready;
                self.shared.bus.post(EngineEvent::StateChanged {
                    old: EngineState::Null,
                    new: EngineState::Ready,
                });
            }
            ctl.target = state;
        }
        self.shared.wake.notify_all();

        if state >= EngineState::Paused {
            self.spawn_streaming_thread()?;
        }
        Ok(())
    }

    fn wait_for_state(&self, state: EngineState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut ctl = self.shared.control.lock();
        loop {
            if let Some(reason) = &ctl.failed {
                return Err(EngineError::init_failed(reason.clone()));
            }
            if ctl.state == state {
                return Ok(());
            }
            if self
                .shared
                .wake
                .wait_until(&mut ctl, deadline)
                .timed_out()
            {
                return Err(EngineError::init_failed(format!(
                    "timed out waiting for {state} state (currently {})",
                    ctl.state
                )));
            }
        }
    }

    fn seek(&self, position: Pts, flush: bool) -> Result<u64> {
        let params = &self.shared.params;
        let mut ctl = self.shared.control.lock();
        if ctl.state < EngineState::Paused {
            return Err(EngineError::SeekFailed { position });
        }

        let mut frame = params.frame_at(position);
        if let Some(total) = params.total_frames() {
            frame = frame.min(total);
        }
        ctl.next_frame = frame;
        ctl.eos_sent = false;
        ctl.errored = false;
        ctl.last_pts = None;
        if flush {
            ctl.segment += 1;
            self.shared.segment.store(ctl.segment, Ordering::Release);
        }
        self.shared.clock.reset_to(params.frame_pts(frame));
        if ctl.state != EngineState::Playing {
            self.shared.clock.pause();
        }
        let segment = ctl.segment;
        drop(ctl);

        self.shared.wake.notify_all();
        tracing::trace!(%position, frame, segment, "test source seeked");
        Ok(segment)
    }

    fn stream_info(&self) -> (Option<VideoStreamInfo>, Option<AudioStreamInfo>) {
        let ctl = self.shared.control.lock();
        if ctl.state < EngineState::Paused {
            return (None, None);
        }
        let params = &self.shared.params;
        let (width, height) = if params.fail == Some(FailMode::Geometry) {
            (0, 0)
        } else {
            (params.width, params.height)
        };
        let video = VideoStreamInfo {
            width,
            height,
            frame_rate: Some(params.fps),
        };
        let audio = params.audio.then_some(AudioStreamInfo {
            channels: 2,
            sample_rate: 48_000,
        });
        (Some(video), audio)
    }

    fn query_duration(&self) -> Option<MediaDuration> {
        let params = &self.shared.params;
        if params.live {
            return None;
        }
        params.duration
    }

    fn query_position(&self) -> Option<Pts> {
        self.shared.control.lock().last_pts
    }

    fn bus(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run(&self) {
        let mut ctl = self.control.lock();
        while !self.shutdown.load(Ordering::Acquire) {
            if ctl.failed.is_some() {
                self.wake.wait_for(&mut ctl, IDLE_WAIT);
                continue;
            }
            if ctl.state != ctl.target {
                self.step_state(&mut ctl);
                continue;
            }
            if ctl.state != EngineState::Playing {
                self.wake.wait_for(&mut ctl, IDLE_WAIT);
                continue;
            }
            self.produce(&mut ctl);
        }
        tracing::trace!("test source streaming thread exiting");
    }

    fn step_state(&self, ctl: &mut MutexGuard<'_, Control>) {
        let old = ctl.state;
        let new = match (old, ctl.target) {
            (EngineState::Ready, target) if target >= EngineState::Paused => {
                if self.params.fail == Some(FailMode::Init) {
                    let reason = "test source could not negotiate caps".to_owned();
                    self.bus.post_error(reason.clone());
                    ctl.failed = Some(reason);
                    self.wake.notify_all();
                    return;
                }
                EngineState::Paused
            }
            (EngineState::Paused, EngineState::Playing) => {
                self.clock.reset_to(self.params.frame_pts(ctl.next_frame));
                EngineState::Playing
            }
            (EngineState::Playing, _) => {
                self.clock.pause();
                EngineState::Paused
            }
            (_, target) => target,
        };
        ctl.state = new;
        self.bus.post(EngineEvent::StateChanged { old, new });
        self.wake.notify_all();
    }

    fn produce(&self, ctl: &mut MutexGuard<'_, Control>) {
        let index = ctl.next_frame;

        if self.params.total_frames().is_some_and(|total| index >= total) {
            if !ctl.eos_sent {
                ctl.eos_sent = true;
                self.bus.post(EngineEvent::Eos {
                    segment: ctl.segment,
                });
            }
            self.wake.wait_for(ctl, IDLE_WAIT);
            return;
        }

        if ctl.errored {
            self.wake.wait_for(ctl, IDLE_WAIT);
            return;
        }
        if self.params.error_at == Some(index) {
            ctl.errored = true;
            self.bus.post(EngineEvent::Error {
                message: format!("test source failed at frame {index}"),
                debug: Some("error_at".to_owned()),
            });
            return;
        }

        let pts = self.params.frame_pts(index);
        if self.params.live {
            let wait = self.clock.until(pts);
            if !wait.is_zero() {
                self.wake.wait_for(ctl, wait.min(IDLE_WAIT));
                return;
            }
        }

        ctl.next_frame = index + 1;
        let segment = ctl.segment;
        let video = self.video_sample(index, segment);
        let audio = self.params.audio.then(|| self.audio_sample(index, segment));

        let delivered = MutexGuard::unlocked(ctl, || {
            self.deliver(self.sinks.video.as_ref(), video, self.video_leaky, segment)
                && audio.is_none_or(|audio| {
                    self.deliver(self.sinks.audio.as_ref(), audio, self.audio_leaky, segment)
                })
        });

        if delivered && ctl.segment == segment {
            ctl.last_pts = Some(pts);
        }
    }

    fn deliver(&self, sink: &dyn SampleSink, sample: MediaSample, leaky: bool, segment: u64) -> bool {
        let outcome = deliver(sink, sample, leaky, RETRY_INTERVAL, || {
            self.shutdown.load(Ordering::Acquire) || self.segment.load(Ordering::Acquire) != segment
        });
        !matches!(outcome, Delivery::Cancelled)
    }

    fn video_sample(&self, index: u64, segment: u64) -> MediaSample {
        let params = &self.params;
        let size = PixelFormat::Bgra.frame_size(params.width, params.height);
        let mut data = vec![(index % 256) as u8; size.max(8)];
        data[..8].copy_from_slice(&index.to_le_bytes());
        let pts = params.frame_pts(index);
        let duration = params.frame_pts(index + 1).saturating_sub(pts);
        MediaSample::video(data, params.width, params.height, PixelFormat::Bgra, pts, duration)
            .with_segment(segment)
    }

    fn audio_sample(&self, index: u64, segment: u64) -> MediaSample {
        let params = &self.params;
        let frames = params.audio_frames_before(index + 1) - params.audio_frames_before(index);
        let data = vec![0u8; frames as usize * 2 * 4];
        let pts = params.frame_pts(index);
        let duration = params.frame_pts(index + 1).saturating_sub(pts);
        MediaSample::audio(
            data,
            48_000,
            media_types::ChannelLayout::Stereo,
            media_types::SampleFormat::S32,
            pts,
            duration,
        )
        .with_segment(segment)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex as PlMutex;

    use super::*;
    use crate::resolve_source;

    #[derive(Default)]
    struct Collect {
        samples: PlMutex<Vec<MediaSample>>,
        limit: Option<usize>,
    }

    impl SampleSink for Collect {
        fn try_push(&self, sample: MediaSample) -> std::result::Result<(), MediaSample> {
            let mut samples = self.samples.lock();
            if self.limit.is_some_and(|limit| samples.len() >= limit) {
                return Err(sample);
            }
            samples.push(sample);
            Ok(())
        }
    }

    fn open(locator: &str) -> (SyntheticDecoder, Arc<Collect>, Arc<Collect>) {
        let video = Arc::new(Collect::default());
        let audio = Arc::new(Collect::default());
        let topology = DecodeTopology::for_source(resolve_source(locator, None).unwrap());
        let engine = SyntheticDecoder::open(
            &topology,
            DecodeSinks {
                video: video.clone(),
                audio: audio.clone(),
            },
        )
        .unwrap();
        (engine, video, audio)
    }

    fn wait_for_eos(engine: &SyntheticDecoder) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(EngineEvent::Eos { .. }) = engine.bus().timed_pop(Duration::from_millis(20)) {
                return;
            }
        }
        panic!("no end of stream");
    }

    #[test]
    fn params_from_uri() {
        let uri = Url::parse("testsrc://?duration=2&fps=30000/1001&width=8&height=4&audio=false")
            .unwrap();
        let params = SyntheticParams::from_uri(&uri).unwrap();
        assert_eq!(params.fps, Rational::new(30000, 1001));
        assert_eq!((params.width, params.height), (8, 4));
        assert!(!params.audio);
        assert_eq!(params.total_frames(), Some(60));
    }

    #[test]
    fn endless_requires_live() {
        let uri = Url::parse("testsrc://?duration=0").unwrap();
        assert!(SyntheticParams::from_uri(&uri).is_err());
        let uri = Url::parse("testsrc://?duration=0&live=1").unwrap();
        assert_eq!(SyntheticParams::from_uri(&uri).unwrap().total_frames(), None);
    }

    #[test]
    fn frame_at_matches_frame_pts() {
        let params = SyntheticParams {
            fps: Rational::new(30000, 1001),
            ..Default::default()
        };
        for index in [0, 1, 2, 3, 299, 300] {
            assert_eq!(params.frame_at(params.frame_pts(index)), index);
        }
        assert_eq!(params.frame_at(Pts(-5)), 0);
    }

    #[test]
    fn produces_every_frame_then_eos() {
        let (engine, video, audio) = open("testsrc://?duration=1&fps=25");
        engine.set_state(EngineState::Paused).unwrap();
        engine
            .wait_for_state(EngineState::Paused, Duration::from_secs(2))
            .unwrap();
        engine.set_state(EngineState::Playing).unwrap();
        wait_for_eos(&engine);

        let video = video.samples.lock();
        assert_eq!(video.len(), 25);
        for (i, sample) in video.iter().enumerate() {
            assert_eq!(frame_index(sample.data()), Some(i as u64));
            assert_eq!(sample.pts(), Pts(i as i64 * 40_000));
        }
        let audio = audio.samples.lock();
        assert_eq!(audio.len(), 25);
        assert_eq!(audio[0].audio_frames(), Some(1920));
        engine.set_state(EngineState::Null).unwrap();
    }

    #[test]
    fn init_failure_is_reported() {
        let (engine, _, _) = open("testsrc://?fail=init");
        engine.set_state(EngineState::Paused).unwrap();
        let err = engine
            .wait_for_state(EngineState::Paused, Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::InitFailed { .. }));
    }

    #[test]
    fn flushing_seek_bumps_segment() {
        let (engine, video, _) = open("testsrc://?duration=1&audio=false");
        assert!(engine.seek(Pts(0), true).is_err());

        engine.set_state(EngineState::Paused).unwrap();
        engine
            .wait_for_state(EngineState::Paused, Duration::from_secs(2))
            .unwrap();
        assert_eq!(engine.seek(Pts(800_000), true).unwrap(), 1);
        engine.set_state(EngineState::Playing).unwrap();
        wait_for_eos(&engine);

        let video = video.samples.lock();
        assert_eq!(video.len(), 5);
        assert_eq!(frame_index(video[0].data()), Some(20));
        assert!(video.iter().all(|s| s.segment() == 1));
    }

    #[test]
    fn full_sink_applies_backpressure() {
        let video = Arc::new(Collect {
            limit: Some(3),
            ..Default::default()
        });
        let audio = Arc::new(Collect::default());
        let topology =
            DecodeTopology::for_source(resolve_source("testsrc://?duration=1", None).unwrap());
        let engine = SyntheticDecoder::open(
            &topology,
            DecodeSinks {
                video: video.clone(),
                audio: audio.clone(),
            },
        )
        .unwrap();
        engine.set_state(EngineState::Playing).unwrap();
        thread::sleep(Duration::from_millis(100));

        // Non-live sources stall instead of dropping
        assert_eq!(video.samples.lock().len(), 3);
        assert_eq!(audio.samples.lock().len(), 3);
        assert_eq!(engine.query_position(), Some(Pts(80_000)));
        engine.set_state(EngineState::Null).unwrap();
    }

    #[test]
    fn error_at_stalls_the_stream() {
        let (engine, video, _) = open("testsrc://?duration=1&error_at=5");
        engine.set_state(EngineState::Playing).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_error = false;
        while Instant::now() < deadline && !saw_error {
            saw_error = matches!(
                engine.bus().timed_pop(Duration::from_millis(20)),
                Some(EngineEvent::Error { .. })
            );
        }
        assert!(saw_error);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(video.samples.lock().len(), 5);
    }
}
