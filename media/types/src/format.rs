/*!
    Pixel and sample layouts carried by media samples.

    Decode engines are always configured to hand over packed BGRA video and
    interleaved S32 audio, so downstream conversion never has to inspect the
    source codec. The other variants exist for the encode side, where engines
    may request a planar layout for their input.
*/

use serde::{Deserialize, Serialize};

/**
    Video pixel layouts understood by the sample conversion code.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed BGRA, 32bpp (decode target)
    Bgra,
    /// Packed RGBA, 32bpp
    Rgba,
    /// Planar YUV 4:2:0, 12bpp (common encoder input)
    Yuv420p,
    /// Semi-planar YUV 4:2:0, 12bpp (hardware encoder input)
    Nv12,
}

impl PixelFormat {
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Yuv420p | Self::Nv12 => 12,
            Self::Bgra | Self::Rgba => 32,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(self, Self::Yuv420p | Self::Nv12)
    }

    /**
        Size in bytes of one tightly packed frame of this format.
    */
    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Bgra | Self::Rgba => pixels * 4,
            Self::Yuv420p | Self::Nv12 => {
                let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
                pixels + chroma * 2
            }
        }
    }
}

/**
    Audio sample formats. Multi-channel audio is always interleaved.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 32-bit integer, little endian (decode target)
    S32,
    /// Signed 16-bit integer, little endian
    S16,
    /// 32-bit floating point, range [-1.0, 1.0]
    F32,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32)
    }
}

/**
    Audio channel layout.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub const fn channels(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    /**
        Layout for a raw channel count, if one is representable.
    */
    pub const fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}
