use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/**
    Play-head state of a scheduler.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayheadState {
    /// Waiting for the lookahead buffer to fill after open or a flush.
    #[default]
    Buffering,
    Playing,
    /// The host asked for a frame that was not ready.
    Underflow,
    Seeking,
    Looping,
}

impl PlayheadState {
    const ALL: [Self; 5] = [
        Self::Buffering,
        Self::Playing,
        Self::Underflow,
        Self::Seeking,
        Self::Looping,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(Self::Buffering)
    }
}

impl fmt::Display for PlayheadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Buffering => "buffering",
            Self::Playing => "playing",
            Self::Underflow => "underflow",
            Self::Seeking => "seeking",
            Self::Looping => "looping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicPlayhead(AtomicU8);

impl AtomicPlayhead {
    pub(crate) fn load(&self) -> PlayheadState {
        PlayheadState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: PlayheadState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/**
    Point-in-time snapshot of a scheduler, for status queries.

    Times are in seconds. A clip duration of -1 means unbounded.
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub name: String,
    pub path: String,
    #[serde(rename = "loop")]
    pub looping: bool,
    /// `(start, duration)` of the play window.
    pub clip: (f64, f64),
    /// `(position, source duration)`.
    pub time: (f64, f64),
    pub playhead: PlayheadState,
    pub ready: bool,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playhead_round_trips_through_atomic() {
        let playhead = AtomicPlayhead::default();
        assert_eq!(playhead.load(), PlayheadState::Buffering);
        for state in PlayheadState::ALL {
            playhead.store(state);
            assert_eq!(playhead.load(), state);
        }
    }

    #[test]
    fn status_serializes_with_lowercase_playhead() {
        let status = PlaybackStatus {
            name: "clip.mp4".to_owned(),
            path: "file:///media/clip.mp4".to_owned(),
            looping: true,
            clip: (0.0, -1.0),
            time: (1.5, 10.0),
            playhead: PlayheadState::Underflow,
            ready: true,
            last_error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["playhead"], "underflow");
        assert_eq!(json["loop"], true);
        assert_eq!(json["clip"][1], -1.0);
    }
}
