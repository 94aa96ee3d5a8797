/*!
    Pacing clocks.
*/

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::Pts;

/**
    Trait for pacing clocks.

    Live sources use a clock to decide when the next sample is due, and the
    command line host uses one to tick at the output field rate.
*/
pub trait Clock: Send + Sync {
    /// Current position of the clock.
    fn position(&self) -> Pts;

    /// Move the clock to `position` (after a seek, for example).
    fn reset_to(&self, position: Pts);
}

#[derive(Debug)]
struct WallState {
    started: Instant,
    offset: Duration,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

/**
    Wall-time clock with pause and resume.
*/
#[derive(Debug)]
pub struct WallClock {
    state: Mutex<WallState>,
}

impl WallClock {
    /**
        Create a new wall clock starting at position zero.
    */
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WallState {
                started: Instant::now(),
                offset: Duration::ZERO,
                paused_at: None,
                paused_total: Duration::ZERO,
            }),
        }
    }

    /**
        Pause the clock. While paused, `position()` returns the same value.
    */
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(paused_at) = state.paused_at.take() {
            state.paused_total += paused_at.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused_at.is_some()
    }

    /**
        How long until the clock reaches `target`, or zero if it already has.
    */
    pub fn until(&self, target: Pts) -> Duration {
        target
            .to_duration()
            .saturating_sub(self.position().to_duration())
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn position(&self) -> Pts {
        let state = self.state.lock();
        let now = state.paused_at.unwrap_or_else(Instant::now);
        let elapsed = now
            .saturating_duration_since(state.started)
            .saturating_sub(state.paused_total);
        Pts::from_duration(state.offset + elapsed)
    }

    fn reset_to(&self, position: Pts) {
        let mut state = self.state.lock();
        state.started = Instant::now();
        state.offset = position.to_duration();
        state.paused_at = None;
        state.paused_total = Duration::ZERO;
    }
}

static_assertions::assert_impl_all!(WallClock: Send, Sync, Clock);
