/*!
    Adapter lifecycle state.
*/

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/**
    Lifecycle of an ingest or egress adapter.

    Transitions only move forward, with two exceptions: `Paused` and `Playing`
    may alternate freely, and a reset moves any non-terminal state back to
    `Uninitialized` before the engine is rebuilt. `Aborted` is terminal.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Paused = 1,
    Playing = 2,
    Error = 3,
    Aborted = 4,
}

impl PipelineState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Paused,
            2 => Self::Playing,
            3 => Self::Error,
            _ => Self::Aborted,
        }
    }

    /**
        Returns true if moving from `self` to `next` is allowed.
    */
    pub const fn can_transition_to(self, next: Self) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Aborted, _) => false,
            (_, Aborted) => true,
            (Uninitialized, Paused | Playing | Error) => true,
            (Paused, Playing) | (Playing, Paused) => true,
            (Paused | Playing, Error) => true,
            _ => false,
        }
    }

    pub const fn is_running(self) -> bool {
        matches!(self, Self::Paused | Self::Playing)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Paused => "paused",
            Self::Playing => "playing",
            Self::Error => "error",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/**
    A [`PipelineState`] shared between the host thread and adapter threads.
*/
#[derive(Debug)]
pub struct AtomicPipelineState {
    inner: AtomicU8,
}

impl AtomicPipelineState {
    pub const fn new(state: PipelineState) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> PipelineState {
        PipelineState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /**
        Move to `next` if the transition is allowed.

        Returns the previous state on success, or the current state if the
        transition was rejected. Transitioning to the current state is a no-op
        that reports success.
    */
    pub fn transition(&self, next: PipelineState) -> Result<PipelineState, PipelineState> {
        let mut current = self.load();
        loop {
            if current == next {
                return Ok(current);
            }
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.inner.compare_exchange_weak(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = PipelineState::from_u8(actual),
            }
        }
    }

    /**
        Return to `Uninitialized` ahead of a full re-open.

        Fails only if the state is already `Aborted`.
    */
    pub fn reset(&self) -> Result<PipelineState, PipelineState> {
        let mut current = self.load();
        loop {
            if current == PipelineState::Aborted {
                return Err(current);
            }
            match self.inner.compare_exchange_weak(
                current as u8,
                PipelineState::Uninitialized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = PipelineState::from_u8(actual),
            }
        }
    }
}

impl Default for AtomicPipelineState {
    fn default() -> Self {
        Self::new(PipelineState::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_and_playing_alternate() {
        let state = AtomicPipelineState::default();
        assert_eq!(
            state.transition(PipelineState::Paused),
            Ok(PipelineState::Uninitialized)
        );
        assert!(state.transition(PipelineState::Playing).is_ok());
        assert!(state.transition(PipelineState::Paused).is_ok());
        assert_eq!(state.load(), PipelineState::Paused);
    }

    #[test]
    fn error_is_one_directional() {
        let state = AtomicPipelineState::new(PipelineState::Playing);
        assert!(state.transition(PipelineState::Error).is_ok());
        assert_eq!(
            state.transition(PipelineState::Playing),
            Err(PipelineState::Error)
        );
    }

    #[test]
    fn aborted_is_terminal() {
        let state = AtomicPipelineState::new(PipelineState::Error);
        assert!(state.transition(PipelineState::Aborted).is_ok());
        assert!(state.transition(PipelineState::Paused).is_err());
        assert!(state.reset().is_err());
        // Repeated aborts are harmless
        assert!(state.transition(PipelineState::Aborted).is_ok());
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let state = AtomicPipelineState::new(PipelineState::Error);
        assert_eq!(state.reset(), Ok(PipelineState::Error));
        assert_eq!(state.load(), PipelineState::Uninitialized);
    }
}
