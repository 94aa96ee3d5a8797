use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use media_egress::EgressConfig;
use media_ingest::IngestConfig;
use media_playback::PlaybackConfig;
use media_types::VideoFormat;

/**
    Playback tunables as they appear in the config file.
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackTunables {
    pub lookahead_frames: Option<usize>,
    pub preroll_frames: usize,
    pub min_loop_frames: u64,
}

impl Default for PlaybackTunables {
    fn default() -> Self {
        let defaults = PlaybackConfig::default();
        Self {
            lookahead_frames: defaults.lookahead_frames,
            preroll_frames: defaults.preroll_frames,
            min_loop_frames: defaults.min_loop_frames,
        }
    }
}

/**
    Contents of the `--config` file. Every field is optional.

    ```json
    {
        "media_root": "/srv/media",
        "format": "1080i5000",
        "playback": { "preroll_frames": 2 },
        "egress": { "video_bitrate": 6000, "preset": "fast" }
    }
    ```
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub media_root: Option<PathBuf>,
    /// Name of the output format, see `mediabridge formats`.
    pub format: String,
    pub playback: PlaybackTunables,
    /// Defaults for recordings. The destination is ignored.
    pub egress: EgressConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            media_root: None,
            format: VideoFormat::default().name,
            playback: PlaybackTunables::default(),
            egress: EgressConfig::default(),
        }
    }
}

impl BridgeConfig {
    /**
        Load the config file at `path`, or the defaults if there is none.
    */
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn output_format(&self) -> Result<VideoFormat> {
        VideoFormat::by_name(&self.format).ok_or_else(|| {
            let known: Vec<_> = VideoFormat::names().collect();
            anyhow!(
                "unknown format '{}', expected one of: {}",
                self.format,
                known.join(", ")
            )
        })
    }

    pub fn ingest(&self) -> IngestConfig {
        let config = IngestConfig::new();
        match &self.media_root {
            Some(root) => config.with_media_root(root),
            None => config,
        }
    }

    pub fn playback(&self, format: VideoFormat) -> PlaybackConfig {
        let tunables = &self.playback;
        let config = PlaybackConfig::new(format)
            .with_preroll(tunables.preroll_frames)
            .with_min_loop_frames(tunables.min_loop_frames);
        match tunables.lookahead_frames {
            Some(frames) => config.with_lookahead(frames),
            None => config,
        }
    }

    pub fn egress(&self, destination: &str) -> EgressConfig {
        EgressConfig {
            destination: destination.to_owned(),
            ..self.egress.clone()
        }
    }
}
