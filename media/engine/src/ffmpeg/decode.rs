/*!
    FFmpeg decode engine.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ffmpeg_next::{
    ChannelLayout as FfChannelLayout, Dictionary, codec, decoder, filter, format, frame, media,
    software::{resampling, scaling},
};
use parking_lot::{Condvar, Mutex, MutexGuard};

use media_types::{
    AudioStreamInfo, ChannelLayout, EngineError, MediaDuration, MediaSample, PixelFormat, Pts,
    Rational, Result, SampleFormat, SampleKind, VideoStreamInfo,
};

use super::{build_filter, init, runtime, to_rational};
use crate::engine::{Delivery, deliver};
use crate::{
    DecodeEngine, DecodeSinks, DecodeTopology, EngineEvent, EngineState, EventBus, SampleSink,
    SourceKind,
};

const RETRY_INTERVAL: Duration = Duration::from_millis(5);
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Control {
    state: EngineState,
    target: EngineState,
    pending_seek: Option<Pts>,
    segment: u64,
    video: Option<VideoStreamInfo>,
    audio: Option<AudioStreamInfo>,
    duration: Option<MediaDuration>,
    last_pts: Option<Pts>,
    failed: Option<String>,
    eos: bool,
}

struct Shared {
    topology: DecodeTopology,
    sinks: DecodeSinks,
    video_leaky: bool,
    audio_leaky: bool,
    bus: EventBus,
    control: Mutex<Control>,
    wake: Condvar,
    shutdown: AtomicBool,
    segment: AtomicU64,
}

/**
    Decode engine reading files and network streams through FFmpeg.

    Video is converted to BGRA at the source size, audio is resampled to
    interleaved S32 stereo at 48 kHz.
*/
pub struct FfmpegDecoder {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FfmpegDecoder {
    pub fn open(topology: &DecodeTopology, sinks: DecodeSinks) -> Result<Self> {
        init()?;
        let live = topology.source.is_live();
        Ok(Self {
            shared: Arc::new(Shared {
                topology: topology.clone(),
                sinks,
                video_leaky: topology.video_sink.leaky && live,
                audio_leaky: topology.audio_sink.leaky && live,
                bus: EventBus::new(),
                control: Mutex::new(Control {
                    state: EngineState::Null,
                    target: EngineState::Null,
                    pending_seek: None,
                    segment: 0,
                    video: None,
                    audio: None,
                    duration: None,
                    last_pts: None,
                    failed: None,
                    eos: false,
                }),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
                segment: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        })
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("ffmpeg decode thread panicked");
            }
        }
    }
}

impl DecodeEngine for FfmpegDecoder {
    fn set_state(&self, state: EngineState) -> Result<()> {
        if state == EngineState::Null {
            self.shutdown();
            let mut ctl = self.shared.control.lock();
            let old = std::mem::replace(&mut ctl.state, EngineState::Null);
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
            let mut slot = self.thread.lock();
            if slot.is_none() {
                let shared = Arc::clone(&self.shared);
                *slot = Some(
                    thread::Builder::new()
                        .name("ffmpeg-decode".into())
                        .spawn(move || shared.run())?,
                );
            }
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
                    "timed out waiting for {state} state"
                )));
            }
        }
    }

    fn seek(&self, position: Pts, flush: bool) -> Result<u64> {
        let mut ctl = self.shared.control.lock();
        if ctl.state < EngineState::Paused {
            return Err(EngineError::SeekFailed { position });
        }
        ctl.pending_seek = Some(position);
        ctl.eos = false;
        ctl.last_pts = None;
        if flush {
            ctl.segment += 1;
            self.shared.segment.store(ctl.segment, Ordering::Release);
        }
        let segment = ctl.segment;
        drop(ctl);
        self.shared.wake.notify_all();
        Ok(segment)
    }

    fn stream_info(&self) -> (Option<VideoStreamInfo>, Option<AudioStreamInfo>) {
        let ctl = self.shared.control.lock();
        (ctl.video, ctl.audio)
    }

    fn query_duration(&self) -> Option<MediaDuration> {
        self.shared.control.lock().duration
    }

    fn query_position(&self) -> Option<Pts> {
        self.shared.control.lock().last_pts
    }

    fn bus(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run(&self) {
        let mut stream = match Stream::open(&self.topology) {
            Ok(stream) => stream,
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(source = %self.topology.source, error = %reason, "failed to open input");
                self.bus.post_error(reason.clone());
                self.control.lock().failed = Some(reason);
                self.wake.notify_all();
                return;
            }
        };

        {
            let mut ctl = self.control.lock();
            ctl.video = Some(stream.video_info());
            ctl.audio = stream.audio_info();
            ctl.duration = stream.duration;
        }
        self.bus.post(EngineEvent::DurationChanged);

        loop {
            let mut ctl = self.control.lock();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if let Some(position) = ctl.pending_seek.take() {
                drop(ctl);
                if let Err(e) = stream.seek(position) {
                    tracing::warn!(%position, error = %e, "seek failed");
                    self.bus.post(EngineEvent::Warning {
                        message: format!("seek to {position} failed: {e}"),
                    });
                }
                continue;
            }
            if ctl.state != ctl.target {
                self.step_state(&mut ctl);
                continue;
            }
            if ctl.state != EngineState::Playing || ctl.eos {
                self.wake.wait_for(&mut ctl, IDLE_WAIT);
                continue;
            }
            let segment = ctl.segment;

            let read = MutexGuard::unlocked(&mut ctl, || stream.read(segment));
            match read {
                Ok(read) => {
                    let last_video = MutexGuard::unlocked(&mut ctl, || self.deliver_all(read.samples, segment));
                    if ctl.segment != segment {
                        continue;
                    }
                    if let Some(pts) = last_video {
                        ctl.last_pts = Some(pts);
                    }
                    if read.eof {
                        ctl.eos = true;
                        self.bus.post(EngineEvent::Eos { segment });
                    }
                }
                Err(e) => {
                    self.bus.post(EngineEvent::Error {
                        message: e.to_string(),
                        debug: Some(self.topology.source.to_string()),
                    });
                }
            }
        }
    }

    fn step_state(&self, ctl: &mut MutexGuard<'_, Control>) {
        let old = ctl.state;
        let new = match (old, ctl.target) {
            (EngineState::Ready, target) if target >= EngineState::Paused => EngineState::Paused,
            (EngineState::Playing, _) => EngineState::Paused,
            (_, target) => target,
        };
        ctl.state = new;
        self.bus.post(EngineEvent::StateChanged { old, new });
        self.wake.notify_all();
    }

    fn deliver_all(&self, samples: Vec<MediaSample>, segment: u64) -> Option<Pts> {
        let mut last_video = None;
        for sample in samples {
            let (sink, leaky): (&dyn SampleSink, bool) = match sample.kind() {
                SampleKind::Video => {
                    last_video = Some(sample.pts());
                    (self.sinks.video.as_ref(), self.video_leaky)
                }
                SampleKind::Audio => (self.sinks.audio.as_ref(), self.audio_leaky),
            };
            let outcome = deliver(sink, sample, leaky, RETRY_INTERVAL, || {
                self.shutdown.load(Ordering::Acquire)
                    || self.segment.load(Ordering::Acquire) != segment
            });
            if let Delivery::Cancelled = outcome {
                return None;
            }
        }
        last_video
    }
}

struct VideoPath {
    index: usize,
    decoder: decoder::Video,
    time_base: Rational,
    frame_duration: MediaDuration,
    frame_rate: Option<Rational>,
    filter: Option<filter::Graph>,
    scaler: Option<(format::Pixel, u32, u32, scaling::Context)>,
    next_pts: Pts,
}

struct AudioPath {
    index: usize,
    decoder: decoder::Audio,
    time_base: Rational,
    resampler: resampling::Context,
    sample_rate: u32,
    next_pts: Pts,
}

struct Read {
    samples: Vec<MediaSample>,
    eof: bool,
}

struct Stream {
    input: format::context::Input,
    video: VideoPath,
    audio: Option<AudioPath>,
    duration: Option<MediaDuration>,
}

impl Stream {
    fn open(topology: &DecodeTopology) -> Result<Self> {
        let source = &topology.source;
        let target = match &source.kind {
            SourceKind::File(path) => path.to_string_lossy().into_owned(),
            _ => source.uri.to_string(),
        };

        let mut options = Dictionary::new();
        if let Some(buffering) = topology.buffering {
            options.set("buffer_size", &buffering.size_bytes.to_string());
            options.set("max_delay", &buffering.duration.as_micros().to_string());
        }

        let input = format::input_with_dictionary(&target, options)
            .map_err(|e| EngineError::invalid_source(&source.locator, e.to_string()))?;

        let (index, time_base, frame_rate, parameters) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| EngineError::invalid_source(&source.locator, "no video stream"))?;
            (
                stream.index(),
                to_rational(stream.time_base()).unwrap_or(Pts::TIME_BASE),
                to_rational(stream.avg_frame_rate()),
                stream.parameters(),
            )
        };
        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| runtime("video decoder", e))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(EngineError::invalid_source(
                &source.locator,
                "video stream reports no geometry",
            ));
        }

        let filter = match &topology.filter {
            Some(spec) => Some(
                build_filter(
                    decoder.width(),
                    decoder.height(),
                    decoder.format(),
                    time_base,
                    spec,
                )
                .map_err(|e| runtime("video filter", e))?,
            ),
            None => None,
        };

        let audio = match input.streams().best(media::Type::Audio) {
            Some(stream) => {
                let index = stream.index();
                let time_base = to_rational(stream.time_base()).unwrap_or(Pts::TIME_BASE);
                let decoder = codec::context::Context::from_parameters(stream.parameters())
                    .and_then(|ctx| ctx.decoder().audio())
                    .map_err(|e| runtime("audio decoder", e))?;
                let resampler = decoder
                    .resampler(
                        format::Sample::I32(format::sample::Type::Packed),
                        FfChannelLayout::STEREO,
                        topology.sample_rate,
                    )
                    .map_err(|e| runtime("audio resampler", e))?;
                Some(AudioPath {
                    index,
                    decoder,
                    time_base,
                    resampler,
                    sample_rate: topology.sample_rate,
                    next_pts: Pts::ZERO,
                })
            }
            None => None,
        };

        let duration = (input.duration() > 0).then(|| MediaDuration(input.duration()));
        let frame_duration = frame_rate
            .map(MediaDuration::frame)
            .unwrap_or(MediaDuration(40_000));

        tracing::info!(
            source = %source,
            width = decoder.width(),
            height = decoder.height(),
            audio = audio.is_some(),
            "opened input"
        );

        Ok(Self {
            input,
            video: VideoPath {
                index,
                decoder,
                time_base,
                frame_duration,
                frame_rate,
                filter,
                scaler: None,
                next_pts: Pts::ZERO,
            },
            audio,
            duration,
        })
    }

    fn video_info(&self) -> VideoStreamInfo {
        VideoStreamInfo {
            width: self.video.decoder.width(),
            height: self.video.decoder.height(),
            frame_rate: self.video.frame_rate,
        }
    }

    fn audio_info(&self) -> Option<AudioStreamInfo> {
        self.audio.as_ref().map(|audio| AudioStreamInfo {
            channels: ChannelLayout::Stereo.channels(),
            sample_rate: audio.sample_rate,
        })
    }

    fn seek(&mut self, position: Pts) -> std::result::Result<(), ffmpeg_next::Error> {
        // Input-level seeks are expressed in AV_TIME_BASE, which is microseconds
        let ts = position.0.max(0);
        self.input.seek(ts, ..ts)?;
        self.video.decoder.flush();
        self.video.next_pts = position;
        if let Some(audio) = &mut self.audio {
            audio.decoder.flush();
            audio.next_pts = position;
        }
        Ok(())
    }

    /**
        Read one packet and return whatever samples it decoded into.
    */
    fn read(&mut self, segment: u64) -> Result<Read> {
        let mut samples = Vec::new();
        let next = self
            .input
            .packets()
            .next()
            .map(|(stream, packet)| (stream.index(), packet));

        let Some((index, packet)) = next else {
            self.video
                .decoder
                .send_eof()
                .map_err(|e| runtime("video decoder", e))?;
            self.video.receive(segment, &mut samples)?;
            if let Some(audio) = &mut self.audio {
                audio
                    .decoder
                    .send_eof()
                    .map_err(|e| runtime("audio decoder", e))?;
                audio.receive(segment, &mut samples)?;
            }
            return Ok(Read { samples, eof: true });
        };

        if index == self.video.index {
            self.video
                .decoder
                .send_packet(&packet)
                .map_err(|e| runtime("video decode", e))?;
            self.video.receive(segment, &mut samples)?;
        } else if let Some(audio) = self.audio.as_mut().filter(|audio| audio.index == index) {
            audio
                .decoder
                .send_packet(&packet)
                .map_err(|e| runtime("audio decode", e))?;
            audio.receive(segment, &mut samples)?;
        }

        Ok(Read {
            samples,
            eof: false,
        })
    }
}

impl VideoPath {
    fn receive(&mut self, segment: u64, out: &mut Vec<MediaSample>) -> Result<()> {
        let mut decoded = frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let Some(graph) = self.filter.as_mut() else {
                out.push(self.convert(&decoded, segment)?);
                continue;
            };

            graph
                .get("in")
                .ok_or(ffmpeg_next::Error::FilterNotFound)
                .and_then(|mut ctx| ctx.source().add(&decoded))
                .map_err(|e| runtime("video filter", e))?;

            let mut filtered = frame::Video::empty();
            loop {
                let pulled = match self.filter.as_mut().and_then(|graph| graph.get("out")) {
                    Some(mut ctx) => ctx.sink().frame(&mut filtered).is_ok(),
                    None => false,
                };
                if !pulled {
                    break;
                }
                out.push(self.convert(&filtered, segment)?);
            }
        }
        Ok(())
    }

    fn convert(&mut self, decoded: &frame::Video, segment: u64) -> Result<MediaSample> {
        let (width, height, format) = (decoded.width(), decoded.height(), decoded.format());
        let stale = self
            .scaler
            .as_ref()
            .is_none_or(|(f, w, h, _)| (*f, *w, *h) != (format, width, height));
        if stale {
            let scaler = scaling::Context::get(
                format,
                width,
                height,
                format::Pixel::BGRA,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| runtime("video scaler", e))?;
            self.scaler = Some((format, width, height, scaler));
        }

        let mut bgra = frame::Video::empty();
        if let Some((_, _, _, scaler)) = self.scaler.as_mut() {
            scaler
                .run(decoded, &mut bgra)
                .map_err(|e| runtime("video scaler", e))?;
        }

        let row = width as usize * 4;
        let stride = bgra.stride(0);
        let plane = bgra.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&plane[y * stride..y * stride + row]);
        }

        let pts = decoded
            .timestamp()
            .map(|ts| Pts::from_time_base(ts, self.time_base))
            .unwrap_or(self.next_pts);
        self.next_pts = pts.saturating_add(self.frame_duration);

        Ok(MediaSample::video(
            data,
            width,
            height,
            PixelFormat::Bgra,
            pts,
            self.frame_duration,
        )
        .with_segment(segment))
    }
}

impl AudioPath {
    fn receive(&mut self, segment: u64, out: &mut Vec<MediaSample>) -> Result<()> {
        let mut decoded = frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut converted = frame::Audio::empty();
            self.resampler
                .run(&decoded, &mut converted)
                .map_err(|e| runtime("audio resampler", e))?;

            let samples = converted.samples();
            if samples == 0 {
                continue;
            }
            let bytes = samples * 2 * SampleFormat::S32.bytes_per_sample();
            let data = converted.data(0)[..bytes].to_vec();

            let pts = decoded
                .timestamp()
                .map(|ts| Pts::from_time_base(ts, self.time_base))
                .unwrap_or(self.next_pts);
            let duration = MediaDuration(samples as i64 * 1_000_000 / self.sample_rate as i64);
            self.next_pts = pts.saturating_add(duration);

            out.push(
                MediaSample::audio(
                    data,
                    self.sample_rate,
                    ChannelLayout::Stereo,
                    SampleFormat::S32,
                    pts,
                    duration,
                )
                .with_segment(segment),
            );
        }
        Ok(())
    }
}
