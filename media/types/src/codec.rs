/*!
    Encoder selection.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/**
    Video encoders an egress pipeline can be configured with.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Software H.264 (x264)
    #[default]
    X264,
    /// Software H.264 (OpenH264)
    OpenH264,
    /// Hardware H.264 (NVENC)
    NvH264,
    Vp8,
    Vp9,
    /// Motion JPEG / still image
    Mjpeg,
}

impl VideoCodec {
    /**
        Parse a codec name as accepted by egress option strings.

        Returns `None` for names that are not recognized.
    */
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "x264" | "libx264" | "h264" => Some(Self::X264),
            "openh264" | "libopenh264" => Some(Self::OpenH264),
            "nvenc" | "nvh264" | "h264_nvenc" => Some(Self::NvH264),
            "vp8" | "libvpx" => Some(Self::Vp8),
            "vp9" | "libvpx-vp9" => Some(Self::Vp9),
            "jpeg" | "mjpeg" => Some(Self::Mjpeg),
            _ => None,
        }
    }

    /**
        Encoder name understood by FFmpeg.
    */
    pub const fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::OpenH264 => "libopenh264",
            Self::NvH264 => "h264_nvenc",
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
            Self::Mjpeg => "mjpeg",
        }
    }

    pub const fn is_h264(self) -> bool {
        matches!(self, Self::X264 | Self::OpenH264 | Self::NvH264)
    }

    /**
        Returns true for codecs that may be stored in a WebM container.
    */
    pub const fn is_webm_compatible(self) -> bool {
        matches!(self, Self::Vp8 | Self::Vp9)
    }

    pub const fn is_hardware(self) -> bool {
        matches!(self, Self::NvH264)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::X264 => "x264",
            Self::OpenH264 => "openh264",
            Self::NvH264 => "nvh264",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Mjpeg => "mjpeg",
        };
        f.write_str(name)
    }
}

/**
    Audio encoders an egress pipeline can be configured with.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Opus,
    Vorbis,
    Mp3,
}

impl AudioCodec {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aac" | "faac" | "avenc_aac" => Some(Self::Aac),
            "opus" | "libopus" => Some(Self::Opus),
            "vorbis" | "libvorbis" => Some(Self::Vorbis),
            "mp3" | "lame" | "libmp3lame" => Some(Self::Mp3),
            _ => None,
        }
    }

    pub const fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Vorbis => "libvorbis",
            Self::Mp3 => "libmp3lame",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Mp3 => "mp3",
        };
        f.write_str(name)
    }
}
