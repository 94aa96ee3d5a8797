use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use media_engine::{AUDIO_SINK_CAPACITY, VIDEO_SINK_CAPACITY};
use media_types::ScaleMode;

const DEFAULT_OPEN_TIMEOUT_MS: u64 = 10_000;

/**
    Configuration for opening an [`crate::IngestAdapter`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory that relative locators are resolved against.
    pub media_root: Option<PathBuf>,
    /// Video filter expression handed to the engine.
    pub filter: Option<String>,
    pub scale_mode: ScaleMode,
    /// Restart from the beginning when the source ends.
    #[serde(rename = "loop")]
    pub looping: bool,
    pub video_capacity: usize,
    pub audio_capacity: usize,
    /// How long the engine may take to preroll before opening fails.
    pub open_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            media_root: None,
            filter: None,
            scale_mode: ScaleMode::default(),
            looping: false,
            video_capacity: VIDEO_SINK_CAPACITY,
            audio_capacity: AUDIO_SINK_CAPACITY,
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.media_root = Some(root.into());
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_scale_mode(mut self, mode: ScaleMode) -> Self {
        self.scale_mode = mode;
        self
    }

    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_capacities(mut self, video: usize, audio: usize) -> Self {
        self.video_capacity = video;
        self.audio_capacity = audio;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: IngestConfig =
            serde_json::from_str(r#"{ "loop": true, "scale_mode": "FIT" }"#).unwrap();
        assert!(config.looping);
        assert_eq!(config.scale_mode, ScaleMode::Fit);
        assert_eq!(config.video_capacity, 64);
        assert_eq!(config.open_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn builders() {
        let config = IngestConfig::new()
            .with_media_root("/media")
            .with_capacities(8, 16)
            .with_open_timeout(Duration::from_millis(250));
        assert_eq!(config.media_root, Some(PathBuf::from("/media")));
        assert_eq!((config.video_capacity, config.audio_capacity), (8, 16));
        assert_eq!(config.open_timeout_ms, 250);
    }
}
