use serde::{Deserialize, Serialize};

use media_engine::{EncodeRequest, EncodeTopology};
use media_types::{AudioCodec, Result, VideoCodec, VideoFormat};

use crate::EgressOptions;

/// Frames a realtime egress may hold before it starts dropping.
pub const REALTIME_QUEUE_CAPACITY: usize = 1;
/// Frames a file egress may hold before `submit` blocks.
pub const BUFFERED_QUEUE_CAPACITY: usize = 64;

/**
    Configuration for opening an [`crate::EgressAdapter`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Output path or URI.
    pub destination: String,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Kilobits per second.
    pub video_bitrate: u32,
    /// Kilobits per second.
    pub audio_bitrate: u32,
    pub preset: String,
    pub filter: Option<String>,
    /// Container override. Picked from the destination when unset.
    pub format: Option<String>,
    /**
        Drop frames instead of blocking when the encoder falls behind.
        Defaults to true for stream destinations and false for files.
    */
    pub realtime: Option<bool>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
            video_bitrate: 3000,
            audio_bitrate: 128,
            preset: "veryfast".to_owned(),
            filter: None,
            format: None,
            realtime: None,
        }
    }
}

impl EgressConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    /**
        Apply every option `options` names on top of this configuration.
    */
    pub fn with_options(mut self, options: EgressOptions) -> Self {
        if let Some(codec) = options.video_codec {
            self.video_codec = codec;
        }
        if let Some(codec) = options.audio_codec {
            self.audio_codec = codec;
        }
        if let Some(rate) = options.video_bitrate {
            self.video_bitrate = rate;
        }
        if let Some(rate) = options.audio_bitrate {
            self.audio_bitrate = rate;
        }
        if let Some(preset) = options.preset {
            self.preset = preset;
        }
        if options.filter.is_some() {
            self.filter = options.filter;
        }
        if options.format.is_some() {
            self.format = options.format;
        }
        if options.realtime.is_some() {
            self.realtime = options.realtime;
        }
        self
    }

    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_bitrates(mut self, video_kbps: u32, audio_kbps: u32) -> Self {
        self.video_bitrate = video_kbps;
        self.audio_bitrate = audio_kbps;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /**
        Select the encode topology for this configuration and output format.

        Fails with [`media_types::EngineError::InvalidSource`] if the
        destination cannot be written to.
    */
    pub fn topology(&self, format: &VideoFormat) -> Result<EncodeTopology> {
        let request = EncodeRequest {
            destination: &self.destination,
            format: self.format.as_deref(),
            video_codec: self.video_codec,
        };
        Ok(EncodeTopology::select(&request)?
            .with_geometry(format.width, format.height, format.frame_rate)
            .with_bitrates(self.video_bitrate, self.audio_bitrate)
            .with_audio_codec(self.audio_codec)
            .with_preset(self.preset.clone())
            .with_filter(self.filter.clone()))
    }

    /**
        Resolve the realtime flag against the selected topology.
    */
    pub fn is_realtime(&self, topology: &EncodeTopology) -> bool {
        self.realtime
            .unwrap_or_else(|| topology.destination.is_stream())
    }

    pub fn queue_capacity(realtime: bool) -> usize {
        if realtime {
            REALTIME_QUEUE_CAPACITY
        } else {
            BUFFERED_QUEUE_CAPACITY
        }
    }
}

#[cfg(test)]
mod tests {
    use media_engine::{ContainerFormat, Destination};
    use media_types::Rational;

    use super::*;

    fn format() -> VideoFormat {
        VideoFormat::new("test-p", 64, 36, Rational::new(25, 1), 1)
    }

    #[test]
    fn defaults() {
        let config = EgressConfig::new("out.mp4");
        assert_eq!(config.video_bitrate, 3000);
        assert_eq!(config.audio_bitrate, 128);
        assert_eq!(config.preset, "veryfast");
        assert_eq!(config.video_codec, VideoCodec::X264);
        assert_eq!(config.audio_codec, AudioCodec::Aac);
    }

    #[test]
    fn options_override_only_what_they_name() {
        let options = EgressOptions::parse("-bitrate:v 8000 -preset:v fast").unwrap();
        let config = EgressConfig::new("out.mp4")
            .with_realtime(true)
            .with_options(options);
        assert_eq!(config.video_bitrate, 8000);
        assert_eq!(config.audio_bitrate, 128);
        assert_eq!(config.preset, "fast");
        assert_eq!(config.realtime, Some(true));
    }

    #[test]
    fn topology_carries_output_geometry() {
        let topology = EgressConfig::new("/tmp/out.mkv")
            .with_bitrates(6000, 192)
            .topology(&format())
            .unwrap();
        assert_eq!(topology.container, ContainerFormat::Mkv);
        assert_eq!((topology.width, topology.height), (64, 36));
        assert_eq!(topology.frame_rate, Rational::new(25, 1));
        assert_eq!(topology.video_bitrate, 6000);
        assert_eq!(topology.audio_bitrate, 192);
    }

    #[test]
    fn realtime_follows_destination_kind() {
        let config = EgressConfig::new("udp://239.0.0.1:1234");
        let topology = config.topology(&format()).unwrap();
        assert!(matches!(topology.destination, Destination::Udp { .. }));
        assert!(config.is_realtime(&topology));

        let config = EgressConfig::new("/tmp/out.mp4");
        assert!(!config.is_realtime(&config.topology(&format()).unwrap()));

        let config = config.with_realtime(true);
        assert!(config.is_realtime(&config.topology(&format()).unwrap()));
    }

    #[test]
    fn queue_capacity_by_mode() {
        assert_eq!(EgressConfig::queue_capacity(true), 1);
        assert_eq!(EgressConfig::queue_capacity(false), 64);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: EgressConfig =
            serde_json::from_str(r#"{"destination": "rtmp://live/app", "video_bitrate": 4500}"#)
                .unwrap();
        assert_eq!(config.destination, "rtmp://live/app");
        assert_eq!(config.video_bitrate, 4500);
        assert_eq!(config.preset, "veryfast");
        assert_eq!(config.realtime, None);
    }
}
