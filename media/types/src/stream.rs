/*!
    Stream metadata read back from an opened source.
*/

use serde::{Deserialize, Serialize};

use crate::{MediaDuration, Rational};

/**
    Negotiated video stream properties.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Nominal frame rate, if the source advertises one.
    pub frame_rate: Option<Rational>,
}

/**
    Negotiated audio stream properties.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub channels: u16,
    pub sample_rate: u32,
}

/**
    Geometry and duration of an opened source.

    Populated once while the ingest adapter opens its engine and never
    mutated afterwards. A reset re-derives it from scratch.
*/
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<Rational>,
    /// Zero when the source has no audio stream.
    pub channels: u16,
    /// Zero when the source has no audio stream.
    pub sample_rate: u32,
    /// `None` for live sources or while the engine cannot tell.
    pub duration: Option<MediaDuration>,
}

impl StreamMetadata {
    pub fn new(
        video: VideoStreamInfo,
        audio: Option<AudioStreamInfo>,
        duration: Option<MediaDuration>,
    ) -> Self {
        let (channels, sample_rate) = audio
            .map(|audio| (audio.channels, audio.sample_rate))
            .unwrap_or_default();
        Self {
            width: video.width,
            height: video.height,
            frame_rate: video.frame_rate,
            channels,
            sample_rate,
            duration,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }

    /**
        Returns true if this geometry can be turned into host frames.
    */
    pub fn is_valid_geometry(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_without_audio() {
        let meta = StreamMetadata::new(
            VideoStreamInfo {
                width: 1280,
                height: 720,
                frame_rate: Some(Rational::new(25, 1)),
            },
            None,
            Some(MediaDuration(10_000_000)),
        );
        assert!(!meta.has_audio());
        assert!(meta.is_valid_geometry());
        assert_eq!(meta.channels, 0);
    }

    #[test]
    fn zero_geometry_is_invalid() {
        let meta = StreamMetadata::default();
        assert!(!meta.is_valid_geometry());
    }

    #[test]
    fn serializes_to_json() {
        let meta = StreamMetadata::new(
            VideoStreamInfo {
                width: 2,
                height: 2,
                frame_rate: None,
            },
            Some(AudioStreamInfo {
                channels: 2,
                sample_rate: 48_000,
            }),
            None,
        );
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sample_rate"], 48_000);
        assert!(value["duration"].is_null());
    }
}
