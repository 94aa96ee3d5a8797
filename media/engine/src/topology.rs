/*!
    Mapping from configuration to engine topology.

    These functions decide which shape of engine to build (target sample
    layouts, sink depths, protocol buffering, container and codec). They are
    pure: no engine is touched until a factory opens the topology.
*/

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use media_types::{
    AudioCodec, ChannelLayout, EngineError, PixelFormat, Rational, Result, SampleFormat,
    ScaleMode, VideoCodec,
};

use crate::ResolvedSource;

/// Depth of the video sink.
pub const VIDEO_SINK_CAPACITY: usize = 64;
/// Depth of the audio sink.
pub const AUDIO_SINK_CAPACITY: usize = 128;

/// Audio is always delivered at this rate.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/**
    Depth and overflow policy of one engine sink.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub capacity: usize,
    /**
        When true, a live engine drops samples the sink rejects. When false,
        the engine holds the sample and retries, stalling its pipeline.
    */
    pub leaky: bool,
}

impl SinkSpec {
    pub const fn video() -> Self {
        Self {
            capacity: VIDEO_SINK_CAPACITY,
            leaky: true,
        }
    }

    pub const fn audio() -> Self {
        Self {
            capacity: AUDIO_SINK_CAPACITY,
            leaky: false,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/**
    Network read-ahead applied to remote sources.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkBuffering {
    pub size_bytes: usize,
    pub duration: Duration,
}

impl NetworkBuffering {
    /**
        Buffering used for a scheme, if any.
    */
    pub fn for_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "rtmp" | "rtmps" => Some(Self {
                size_bytes: 2 * 1024 * 1024,
                duration: Duration::from_secs(2),
            }),
            "http" | "https" => Some(Self {
                size_bytes: 1024 * 1024,
                duration: Duration::from_secs(2),
            }),
            _ => None,
        }
    }
}

/**
    Everything a factory needs to build a decode engine.
*/
#[derive(Clone, Debug)]
pub struct DecodeTopology {
    pub source: ResolvedSource,
    pub video_format: PixelFormat,
    pub audio_format: SampleFormat,
    pub audio_layout: ChannelLayout,
    pub sample_rate: u32,
    pub video_sink: SinkSpec,
    pub audio_sink: SinkSpec,
    pub buffering: Option<NetworkBuffering>,
    /// Engine-specific video filter expression.
    pub filter: Option<String>,
    pub scale_mode: ScaleMode,
}

impl DecodeTopology {
    /**
        Topology with the fixed target layouts (BGRA video, interleaved
        S32 stereo audio at 48 kHz) and the default sink depths.
    */
    pub fn for_source(source: ResolvedSource) -> Self {
        let buffering = NetworkBuffering::for_scheme(source.scheme());
        Self {
            source,
            video_format: PixelFormat::Bgra,
            audio_format: SampleFormat::S32,
            audio_layout: ChannelLayout::Stereo,
            sample_rate: TARGET_SAMPLE_RATE,
            video_sink: SinkSpec::video(),
            audio_sink: SinkSpec::audio(),
            buffering,
            filter: None,
            scale_mode: ScaleMode::default(),
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_scale_mode(mut self, scale_mode: ScaleMode) -> Self {
        self.scale_mode = scale_mode;
        self
    }

    pub fn with_sinks(mut self, video: SinkSpec, audio: SinkSpec) -> Self {
        self.video_sink = video;
        self.audio_sink = audio;
        self
    }
}

/**
    Container format for encoded output.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Mov,
    Flv,
    Mkv,
    MpegTs,
    WebM,
    Avi,
    /// RTP payloading, for RTSP destinations.
    Rtp,
    /// HLS playlist and segments, for HTTP destinations.
    Hls { segment_duration: Duration },
}

impl ContainerFormat {
    /**
        Container for a `-format` value or file extension.
    */
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "mov" | "qt" => Some(Self::Mov),
            "flv" => Some(Self::Flv),
            "mkv" | "matroska" => Some(Self::Mkv),
            "ts" | "mpegts" => Some(Self::MpegTs),
            "webm" => Some(Self::WebM),
            "avi" => Some(Self::Avi),
            "rtp" => Some(Self::Rtp),
            "hls" => Some(Self::hls()),
            _ => None,
        }
    }

    pub fn hls() -> Self {
        Self::Hls {
            segment_duration: Duration::from_secs(2),
        }
    }

    pub fn ffmpeg_format_name(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Flv => "flv",
            Self::Mkv => "matroska",
            Self::MpegTs => "mpegts",
            Self::WebM => "webm",
            Self::Avi => "avi",
            Self::Rtp => "rtsp",
            Self::Hls { .. } => "hls",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Flv => "flv",
            Self::Mkv => "mkv",
            Self::MpegTs => "ts",
            Self::WebM => "webm",
            Self::Avi => "avi",
            Self::Rtp => "sdp",
            Self::Hls { .. } => "m3u8",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Port used for `udp://` destinations that do not name one.
pub const DEFAULT_UDP_PORT: u16 = 5000;

/**
    Where encoded output goes.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    /// A stream URI handed to the engine as-is (rtmp, rtsp, http).
    Stream(Url),
    Udp { host: String, port: u16 },
    /// Discard output. Used by the built-in null encoder.
    Null(Url),
}

impl Destination {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Udp { .. })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stream(url) | Self::Null(url) => f.write_str(url.as_str()),
            Self::Udp { host, port } => write!(f, "udp://{host}:{port}"),
        }
    }
}

/**
    Parameters that select an encode topology.
*/
#[derive(Clone, Debug)]
pub struct EncodeRequest<'a> {
    pub destination: &'a str,
    /// Explicit container override (`-format`).
    pub format: Option<&'a str>,
    pub video_codec: VideoCodec,
}

/**
    Everything a factory needs to build an encode engine.
*/
#[derive(Clone, Debug)]
pub struct EncodeTopology {
    pub destination: Destination,
    pub container: ContainerFormat,
    pub video_codec: VideoCodec,
    /// Kilobits per second.
    pub video_bitrate: u32,
    pub audio_codec: AudioCodec,
    /// Kilobits per second.
    pub audio_bitrate: u32,
    pub preset: String,
    pub filter: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub sample_rate: u32,
    pub audio_layout: ChannelLayout,
}

impl EncodeTopology {
    /**
        Select destination and container for a request. Frame size, rate and
        bitrates start at defaults and are filled in with the `with_*` methods.
    */
    pub fn select(request: &EncodeRequest<'_>) -> Result<Self> {
        let (destination, container) = select_container(request)?;
        Ok(Self {
            destination,
            container,
            video_codec: request.video_codec,
            video_bitrate: 3000,
            audio_codec: AudioCodec::default(),
            audio_bitrate: 128,
            preset: "veryfast".to_owned(),
            filter: None,
            width: 1920,
            height: 1080,
            frame_rate: Rational::new(25, 1),
            sample_rate: TARGET_SAMPLE_RATE,
            audio_layout: ChannelLayout::Stereo,
        })
    }

    pub fn with_geometry(mut self, width: u32, height: u32, frame_rate: Rational) -> Self {
        self.width = width;
        self.height = height;
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_bitrates(mut self, video_kbps: u32, audio_kbps: u32) -> Self {
        self.video_bitrate = video_kbps;
        self.audio_bitrate = audio_kbps;
        self
    }

    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = codec;
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }
}

fn select_container(request: &EncodeRequest<'_>) -> Result<(Destination, ContainerFormat)> {
    let raw = request.destination.trim();
    if raw.is_empty() {
        return Err(EngineError::invalid_source(raw, "empty destination"));
    }

    let explicit = request.format.and_then(|name| {
        let container = ContainerFormat::from_name(name);
        if container.is_none() {
            tracing::warn!(format = name, "unknown container format, ignoring");
        }
        container
    });

    if raw.contains("://") {
        let url = Url::parse(raw)
            .map_err(|e| EngineError::invalid_source(raw, format!("malformed uri: {e}")))?;
        let scheme = url.scheme().to_ascii_lowercase();
        let (destination, by_scheme) = match scheme.as_str() {
            "null" => (Destination::Null(url), ContainerFormat::Mp4),
            "rtmp" | "rtmps" => (Destination::Stream(url), ContainerFormat::Flv),
            "rtsp" => (Destination::Stream(url), ContainerFormat::Rtp),
            "http" | "https" => (Destination::Stream(url), ContainerFormat::hls()),
            "udp" => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| EngineError::invalid_source(raw, "udp destination without host"))?
                    .to_owned();
                let port = url.port().unwrap_or(DEFAULT_UDP_PORT);
                (Destination::Udp { host, port }, ContainerFormat::MpegTs)
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| EngineError::invalid_source(raw, "not a local file uri"))?;
                return Ok(file_container(path, explicit, request.video_codec));
            }
            other => {
                return Err(EngineError::invalid_source(
                    raw,
                    format!("unsupported protocol '{other}'"),
                ));
            }
        };
        return Ok((destination, explicit.unwrap_or(by_scheme)));
    }

    Ok(file_container(PathBuf::from(raw), explicit, request.video_codec))
}

fn file_container(
    path: PathBuf,
    explicit: Option<ContainerFormat>,
    codec: VideoCodec,
) -> (Destination, ContainerFormat) {
    let container = explicit.unwrap_or_else(|| container_for_path(&path));

    if container == ContainerFormat::WebM && !codec.is_webm_compatible() {
        tracing::warn!(
            codec = %codec,
            "webm requires vp8 or vp9, falling back to matroska"
        );
        return (
            Destination::File(path.with_extension("mkv")),
            ContainerFormat::Mkv,
        );
    }

    (Destination::File(path), container)
}

fn container_for_path(path: &Path) -> ContainerFormat {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    match ContainerFormat::from_name(ext) {
        Some(container) if !matches!(container, ContainerFormat::Rtp | ContainerFormat::Hls { .. }) => {
            container
        }
        _ => {
            tracing::warn!(path = %path.display(), "unrecognized output extension, using mp4");
            ContainerFormat::Mp4
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve_source;

    fn select(destination: &str, format: Option<&str>, codec: VideoCodec) -> EncodeTopology {
        EncodeTopology::select(&EncodeRequest {
            destination,
            format,
            video_codec: codec,
        })
        .unwrap()
    }

    #[test]
    fn decode_topology_uses_fixed_layouts() {
        let source = resolve_source("testsrc://", None).unwrap();
        let topology = DecodeTopology::for_source(source);
        assert_eq!(topology.video_format, PixelFormat::Bgra);
        assert_eq!(topology.audio_format, SampleFormat::S32);
        assert_eq!(topology.sample_rate, 48_000);
        assert_eq!(topology.video_sink, SinkSpec { capacity: 64, leaky: true });
        assert_eq!(topology.audio_sink, SinkSpec { capacity: 128, leaky: false });
        assert!(topology.buffering.is_none());
    }

    #[test]
    fn remote_sources_get_buffering() {
        let rtmp = resolve_source("rtmp://host/app", None).unwrap();
        let buffering = DecodeTopology::for_source(rtmp).buffering.unwrap();
        assert_eq!(buffering.size_bytes, 2_097_152);

        let http = resolve_source("https://host/clip.mp4", None).unwrap();
        let buffering = DecodeTopology::for_source(http).buffering.unwrap();
        assert_eq!(buffering.size_bytes, 1_048_576);
        assert_eq!(buffering.duration, Duration::from_secs(2));
    }

    #[test]
    fn blank_filter_is_dropped() {
        let source = resolve_source("testsrc://", None).unwrap();
        let topology = DecodeTopology::for_source(source).with_filter(Some("  ".into()));
        assert!(topology.filter.is_none());
    }

    #[test]
    fn container_by_scheme() {
        assert_eq!(
            select("rtmp://host/live/key", None, VideoCodec::X264).container,
            ContainerFormat::Flv
        );
        assert_eq!(
            select("rtsp://host/stream", None, VideoCodec::X264).container,
            ContainerFormat::Rtp
        );
        assert!(matches!(
            select("http://host/live", None, VideoCodec::X264).container,
            ContainerFormat::Hls { .. }
        ));
    }

    #[test]
    fn udp_port_defaults() {
        let topology = select("udp://239.0.0.1", None, VideoCodec::X264);
        assert_eq!(topology.container, ContainerFormat::MpegTs);
        assert_eq!(
            topology.destination,
            Destination::Udp {
                host: "239.0.0.1".into(),
                port: 5000
            }
        );

        let topology = select("udp://10.0.0.2:1234", None, VideoCodec::X264);
        assert_eq!(
            topology.destination,
            Destination::Udp {
                host: "10.0.0.2".into(),
                port: 1234
            }
        );
    }

    #[test]
    fn container_by_extension() {
        assert_eq!(select("out.mov", None, VideoCodec::X264).container, ContainerFormat::Mov);
        assert_eq!(select("out.ts", None, VideoCodec::X264).container, ContainerFormat::MpegTs);
        assert_eq!(select("out.xyz", None, VideoCodec::X264).container, ContainerFormat::Mp4);
    }

    #[test]
    fn explicit_format_wins() {
        let topology = select("rtmp://host/app", Some("mpegts"), VideoCodec::X264);
        assert_eq!(topology.container, ContainerFormat::MpegTs);
        let topology = select("out.mp4", Some("nonsense"), VideoCodec::X264);
        assert_eq!(topology.container, ContainerFormat::Mp4);
    }

    #[test]
    fn webm_requires_vp_codec() {
        let topology = select("out.webm", None, VideoCodec::Vp9);
        assert_eq!(topology.container, ContainerFormat::WebM);

        let topology = select("out.webm", None, VideoCodec::X264);
        assert_eq!(topology.container, ContainerFormat::Mkv);
        assert_eq!(topology.destination, Destination::File(PathBuf::from("out.mkv")));
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let err = EncodeTopology::select(&EncodeRequest {
            destination: "ftp://host/out.mp4",
            format: None,
            video_codec: VideoCodec::X264,
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSource { .. }));
    }
}
