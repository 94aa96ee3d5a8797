/*!
    FFmpeg encode engine.
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use ffmpeg_next::{
    ChannelLayout as FfChannelLayout, Dictionary, Packet, codec, encoder, filter, format, frame,
    software::{resampling, scaling},
};
use parking_lot::Mutex;

use media_types::{EngineError, MediaSample, Rational, Result, SampleCaps, SampleKind, VideoCodec};

use super::{build_filter, from_rational, init, runtime};
use crate::{ContainerFormat, Destination, EncodeEngine, EncodeTopology, EngineEvent, EngineState, EventBus};

/// Samples queued between `push_sample` and the encoder thread.
const QUEUE_DEPTH: usize = 8;
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;

enum Message {
    Sample(MediaSample),
    EndOfStream,
}

struct Shared {
    bus: EventBus,
    state: Mutex<EngineState>,
    failed: AtomicBool,
}

/**
    Encode engine writing files and streams through FFmpeg.

    The output is opened while the engine is constructed so that bad
    destinations and missing codecs fail immediately.
*/
pub struct FfmpegEncoder {
    shared: Arc<Shared>,
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
}

impl FfmpegEncoder {
    pub fn open(topology: &EncodeTopology) -> Result<Self> {
        init()?;
        let shared = Arc::new(Shared {
            bus: EventBus::new(),
            state: Mutex::new(EngineState::Null),
            failed: AtomicBool::new(false),
        });

        let (tx, rx) = bounded(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = bounded(1);
        let worker = {
            let shared = Arc::clone(&shared);
            let topology = topology.clone();
            thread::Builder::new()
                .name("ffmpeg-encode".into())
                .spawn(move || match Output::open(&topology) {
                    Ok(output) => {
                        let _ = ready_tx.send(Ok(()));
                        output.run(&rx, &shared);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                tx: Some(tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(EngineError::init_failed("encoder thread exited during setup"))
            }
        }
    }

    fn send(&self, message: Message) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| EngineError::runtime("encoder is shut down"))?;
        tx.send(message)
            .map_err(|_| EngineError::runtime("encoder thread has stopped"))
    }
}

impl EncodeEngine for FfmpegEncoder {
    fn set_state(&self, state: EngineState) -> Result<()> {
        let mut current = self.shared.state.lock();
        if *current != state {
            self.shared.bus.post(EngineEvent::StateChanged {
                old: *current,
                new: state,
            });
            *current = state;
        }
        Ok(())
    }

    fn push_sample(&self, sample: MediaSample) -> Result<()> {
        if *self.shared.state.lock() < EngineState::Paused {
            return Err(EngineError::runtime("encoder is not running"));
        }
        if self.shared.failed.load(Ordering::Acquire) {
            return Err(EngineError::runtime("encoder has failed"));
        }
        self.send(Message::Sample(sample))
    }

    fn end_of_stream(&self) -> Result<()> {
        self.send(Message::EndOfStream)
    }

    fn bus(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // Closing the channel lets the worker finalize and exit
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("ffmpeg encode thread panicked");
            }
        }
    }
}

struct VideoOutput {
    encoder: encoder::video::Encoder,
    index: usize,
    time_base: ffmpeg_next::Rational,
    frame_time_base: Rational,
    width: u32,
    height: u32,
    pixel: format::Pixel,
    filter: Option<(String, Option<filter::Graph>)>,
    scaler: Option<(u32, u32, format::Pixel, scaling::Context)>,
}

struct AudioOutput {
    encoder: encoder::audio::Encoder,
    index: usize,
    time_base: ffmpeg_next::Rational,
    format: format::Sample,
    frame_size: usize,
    resampler: resampling::Context,
    pending: Vec<u8>,
    written: i64,
}

struct Output {
    octx: format::context::Output,
    video: VideoOutput,
    audio: AudioOutput,
    target: String,
}

impl Output {
    fn open(topology: &EncodeTopology) -> Result<Self> {
        let target = match &topology.destination {
            Destination::File(path) => path.to_string_lossy().into_owned(),
            Destination::Stream(url) => url.as_str().to_owned(),
            Destination::Udp { host, port } => format!("udp://{host}:{port}"),
            Destination::Null(url) => {
                return Err(EngineError::invalid_source(
                    url.as_str(),
                    "null destinations are handled by the built-in encoder",
                ));
            }
        };

        let mut octx = format::output_as(&target, topology.container.ffmpeg_format_name())
            .map_err(|e| EngineError::invalid_source(&target, e.to_string()))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let video = open_video(&mut octx, topology, global_header)?;
        let audio = open_audio(&mut octx, topology, global_header)?;

        let mut options = Dictionary::new();
        if let ContainerFormat::Hls { segment_duration } = &topology.container {
            options.set("hls_time", &segment_duration.as_secs().max(1).to_string());
        }
        octx.write_header_with(options)
            .map_err(|e| EngineError::init_failed(format!("write header to {target}: {e}")))?;

        tracing::info!(
            destination = %topology.destination,
            container = %topology.container,
            video = %topology.video_codec,
            audio = %topology.audio_codec,
            "opened output"
        );

        Ok(Self {
            octx,
            video,
            audio,
            target,
        })
    }

    fn run(mut self, rx: &Receiver<Message>, shared: &Shared) {
        let mut failed = false;
        for message in rx.iter() {
            match message {
                Message::Sample(_) if failed => {}
                Message::Sample(sample) => {
                    let result = match sample.kind() {
                        SampleKind::Video => self.encode_video(&sample),
                        SampleKind::Audio => self.encode_audio(&sample),
                    };
                    if let Err(e) = result {
                        tracing::error!(output = %self.target, error = %e, "encoding failed");
                        failed = true;
                        shared.failed.store(true, Ordering::Release);
                        shared.bus.post_error(e.to_string());
                    }
                }
                Message::EndOfStream => {
                    match self.finish() {
                        Ok(()) => shared.bus.post(EngineEvent::Eos { segment: 0 }),
                        Err(e) => shared.bus.post_error(e.to_string()),
                    }
                    return;
                }
            }
        }

        // Channel closed without end-of-stream, still leave a readable output
        if let Err(e) = self.finish() {
            tracing::warn!(output = %self.target, error = %e, "failed to finalize output");
        }
    }

    fn encode_video(&mut self, sample: &MediaSample) -> Result<()> {
        let SampleCaps::Video { width, height, .. } = sample.caps() else {
            return Ok(());
        };

        let mut source = frame::Video::new(format::Pixel::BGRA, width, height);
        let row = width as usize * 4;
        let stride = source.stride(0);
        let plane = source.data_mut(0);
        for (y, chunk) in sample.data().chunks_exact(row).take(height as usize).enumerate() {
            plane[y * stride..y * stride + row].copy_from_slice(chunk);
        }
        let pts = sample.pts().to_time_base(self.video.frame_time_base);
        source.set_pts(Some(pts));

        let frames = self.video.filter(source)?;
        for frame in frames {
            self.video.send(&frame, pts)?;
            drain(&mut self.video.encoder, &mut self.octx, self.video.index, self.video.time_base)?;
        }
        Ok(())
    }

    fn encode_audio(&mut self, sample: &MediaSample) -> Result<()> {
        self.audio.pending.extend_from_slice(sample.data());
        let chunk = self.audio.frame_size * 2 * 4;
        while self.audio.pending.len() >= chunk {
            let block: Vec<u8> = self.audio.pending.drain(..chunk).collect();
            self.audio.send(&block)?;
            drain(&mut self.audio.encoder, &mut self.octx, self.audio.index, self.audio.time_base)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.video
            .encoder
            .send_eof()
            .map_err(|e| runtime("video encoder", e))?;
        drain(&mut self.video.encoder, &mut self.octx, self.video.index, self.video.time_base)?;
        self.audio
            .encoder
            .send_eof()
            .map_err(|e| runtime("audio encoder", e))?;
        drain(&mut self.audio.encoder, &mut self.octx, self.audio.index, self.audio.time_base)?;
        self.octx
            .write_trailer()
            .map_err(|e| runtime("write trailer", e))?;
        tracing::debug!(output = %self.target, "output finalized");
        Ok(())
    }
}

impl VideoOutput {
    fn filter(&mut self, source: frame::Video) -> Result<Vec<frame::Video>> {
        let Some((spec, graph)) = self.filter.as_mut() else {
            return Ok(vec![source]);
        };
        if graph.is_none() {
            let built = build_filter(
                source.width(),
                source.height(),
                source.format(),
                self.frame_time_base,
                spec,
            )
            .map_err(|e| runtime("video filter", e))?;
            *graph = Some(built);
        }
        let Some(graph) = graph.as_mut() else {
            return Ok(Vec::new());
        };

        graph
            .get("in")
            .ok_or(ffmpeg_next::Error::FilterNotFound)
            .and_then(|mut ctx| ctx.source().add(&source))
            .map_err(|e| runtime("video filter", e))?;

        let mut frames = Vec::new();
        loop {
            let mut filtered = frame::Video::empty();
            let pulled = match graph.get("out") {
                Some(mut ctx) => ctx.sink().frame(&mut filtered).is_ok(),
                None => false,
            };
            if !pulled {
                break;
            }
            frames.push(filtered);
        }
        Ok(frames)
    }

    fn send(&mut self, source: &frame::Video, pts: i64) -> Result<()> {
        let (width, height, pixel) = (source.width(), source.height(), source.format());
        let stale = self
            .scaler
            .as_ref()
            .is_none_or(|(w, h, p, _)| (*w, *h, *p) != (width, height, pixel));
        if stale {
            let scaler = scaling::Context::get(
                pixel,
                width,
                height,
                self.pixel,
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| runtime("video scaler", e))?;
            self.scaler = Some((width, height, pixel, scaler));
        }

        let mut converted = frame::Video::empty();
        if let Some((_, _, _, scaler)) = self.scaler.as_mut() {
            scaler
                .run(source, &mut converted)
                .map_err(|e| runtime("video scaler", e))?;
        }
        converted.set_pts(source.pts().or(Some(pts)));
        self.encoder
            .send_frame(&converted)
            .map_err(|e| runtime("video encoder", e))
    }
}

impl AudioOutput {
    /**
        Encode one block of interleaved S32 stereo holding exactly
        `frame_size` sample frames.
    */
    fn send(&mut self, block: &[u8]) -> Result<()> {
        let mut source = frame::Audio::new(
            format::Sample::I32(format::sample::Type::Packed),
            self.frame_size,
            FfChannelLayout::STEREO,
        );
        source.set_rate(self.encoder.rate());
        source.data_mut(0)[..block.len()].copy_from_slice(block);

        let mut converted = frame::Audio::new(self.format, self.frame_size, FfChannelLayout::STEREO);
        converted.set_rate(self.encoder.rate());
        self.resampler
            .run(&source, &mut converted)
            .map_err(|e| runtime("audio resampler", e))?;
        converted.set_pts(Some(self.written));
        self.written += self.frame_size as i64;

        self.encoder
            .send_frame(&converted)
            .map_err(|e| runtime("audio encoder", e))
    }
}

fn open_video(
    octx: &mut format::context::Output,
    topology: &EncodeTopology,
    global_header: bool,
) -> Result<VideoOutput> {
    let name = topology.video_codec.ffmpeg_name();
    let codec = encoder::find_by_name(name)
        .ok_or_else(|| EngineError::init_failed(format!("video encoder '{name}' is not available")))?;
    let pixel = match topology.video_codec {
        VideoCodec::Mjpeg => format::Pixel::YUVJ420P,
        _ => format::Pixel::YUV420P,
    };
    let time_base = from_rational(topology.frame_rate.invert());

    let mut ost = octx.add_stream(codec).map_err(|e| runtime("add video stream", e))?;
    let index = ost.index();

    let mut video = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .map_err(|e| runtime("video encoder", e))?;
    video.set_width(topology.width);
    video.set_height(topology.height);
    video.set_format(pixel);
    video.set_time_base(time_base);
    video.set_frame_rate(Some(from_rational(topology.frame_rate)));
    video.set_bit_rate(topology.video_bitrate as usize * 1000);
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let mut options = Dictionary::new();
    if topology.video_codec.is_h264() && !topology.video_codec.is_hardware() {
        options.set("preset", &topology.preset);
    }
    let encoder = video
        .open_with(options)
        .map_err(|e| EngineError::init_failed(format!("open video encoder '{name}': {e}")))?;
    ost.set_parameters(&encoder);
    ost.set_time_base(time_base);

    Ok(VideoOutput {
        encoder,
        index,
        time_base,
        frame_time_base: topology.frame_rate.invert(),
        width: topology.width,
        height: topology.height,
        pixel,
        filter: topology.filter.clone().map(|spec| (spec, None)),
        scaler: None,
    })
}

fn open_audio(
    octx: &mut format::context::Output,
    topology: &EncodeTopology,
    global_header: bool,
) -> Result<AudioOutput> {
    let name = topology.audio_codec.ffmpeg_name();
    let codec = encoder::find_by_name(name)
        .ok_or_else(|| EngineError::init_failed(format!("audio encoder '{name}' is not available")))?;
    let sample_format = codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats())
        .and_then(|mut formats| formats.next())
        .unwrap_or(format::Sample::F32(format::sample::Type::Planar));
    let rate = topology.sample_rate;
    let time_base = ffmpeg_next::Rational::new(1, rate as i32);

    let mut ost = octx.add_stream(codec).map_err(|e| runtime("add audio stream", e))?;
    let index = ost.index();

    let mut audio = codec::context::Context::new_with_codec(codec)
        .encoder()
        .audio()
        .map_err(|e| runtime("audio encoder", e))?;
    audio.set_rate(rate as i32);
    audio.set_channel_layout(FfChannelLayout::STEREO);
    audio.set_format(sample_format);
    audio.set_bit_rate(topology.audio_bitrate as usize * 1000);
    audio.set_time_base(time_base);
    if global_header {
        audio.set_flags(codec::Flags::GLOBAL_HEADER);
    }

    let encoder = audio
        .open_with(Dictionary::new())
        .map_err(|e| EngineError::init_failed(format!("open audio encoder '{name}': {e}")))?;
    ost.set_parameters(&encoder);
    ost.set_time_base(time_base);

    let frame_size = match encoder.frame_size() as usize {
        0 => DEFAULT_AUDIO_FRAME_SIZE,
        size => size,
    };
    let resampler = resampling::Context::get(
        format::Sample::I32(format::sample::Type::Packed),
        FfChannelLayout::STEREO,
        rate,
        sample_format,
        FfChannelLayout::STEREO,
        rate,
    )
    .map_err(|e| runtime("audio resampler", e))?;

    Ok(AudioOutput {
        encoder,
        index,
        time_base,
        format: sample_format,
        frame_size,
        resampler,
        pending: Vec::new(),
        written: 0,
    })
}

/**
    Write every packet the encoder has ready, rescaled to the stream's
    time base.
*/
fn drain(
    encoder: &mut encoder::Encoder,
    octx: &mut format::context::Output,
    index: usize,
    time_base: ffmpeg_next::Rational,
) -> Result<()> {
    let stream_time_base = octx
        .stream(index)
        .map(|stream| stream.time_base())
        .unwrap_or(time_base);
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(index);
        packet.rescale_ts(time_base, stream_time_base);
        packet
            .write_interleaved(octx)
            .map_err(|e| runtime("write packet", e))?;
    }
    Ok(())
}
