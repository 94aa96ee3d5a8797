use serde::{Deserialize, Serialize};

use media_types::VideoFormat;

const DEFAULT_PREROLL_FRAMES: usize = 4;
const DEFAULT_MIN_LOOP_FRAMES: u64 = 2;

/**
    Tunables for a [`crate::PlaybackScheduler`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output format the host pulls at.
    pub format: VideoFormat,
    /// Lookahead depth in frames. Defaults to a quarter second of output.
    pub lookahead_frames: Option<usize>,
    /// Frames to buffer after a flush before the host sees new frames.
    pub preroll_frames: usize,
    /// Frames that must have played since the last seek before a loop restart.
    pub min_loop_frames: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            format: VideoFormat::default(),
            lookahead_frames: None,
            preroll_frames: DEFAULT_PREROLL_FRAMES,
            min_loop_frames: DEFAULT_MIN_LOOP_FRAMES,
        }
    }
}

impl PlaybackConfig {
    pub fn new(format: VideoFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_lookahead(mut self, frames: usize) -> Self {
        self.lookahead_frames = Some(frames);
        self
    }

    pub fn with_preroll(mut self, frames: usize) -> Self {
        self.preroll_frames = frames;
        self
    }

    pub fn with_min_loop_frames(mut self, frames: u64) -> Self {
        self.min_loop_frames = frames;
        self
    }

    pub fn lookahead_capacity(&self) -> usize {
        let quarter_second = self.format.fps_rounded() as usize / 4;
        self.lookahead_frames.unwrap_or(quarter_second).max(1)
    }

    /**
        Effective preroll depth, never deeper than the lookahead buffer.
    */
    pub fn preroll_depth(&self) -> usize {
        self.preroll_frames.min(self.lookahead_capacity())
    }
}
