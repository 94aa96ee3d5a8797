use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use media_types::{MediaDuration, Pts};

/**
    The active in/out/loop range, shared between host command handlers and
    the scheduler thread.

    Each field is an independent atomic. A reader may observe a start from
    one update and a duration from the next, which is tolerated: the
    scheduler re-reads the window on every frame decision, so an update is
    fully visible within one frame period.
*/
#[derive(Debug)]
pub struct PlayWindow {
    start: AtomicI64,
    duration: AtomicI64,
    looping: AtomicBool,
}

impl PlayWindow {
    pub fn new(start: Pts, duration: MediaDuration, looping: bool) -> Self {
        Self {
            start: AtomicI64::new(start.0.max(0)),
            duration: AtomicI64::new(duration.0.max(0)),
            looping: AtomicBool::new(looping),
        }
    }

    pub fn start(&self) -> Pts {
        Pts(self.start.load(Ordering::Acquire))
    }

    pub fn set_start(&self, start: Pts) {
        self.start.store(start.0.max(0), Ordering::Release);
    }

    /**
        Window length. [`MediaDuration::UNBOUNDED`] plays until the source ends.
    */
    pub fn duration(&self) -> MediaDuration {
        MediaDuration(self.duration.load(Ordering::Acquire))
    }

    /// Negative durations are clamped to zero.
    pub fn set_duration(&self, duration: MediaDuration) {
        self.duration.store(duration.0.max(0), Ordering::Release);
    }

    /**
        Absolute end of the window, or `None` when unbounded.
    */
    pub fn end(&self) -> Option<Pts> {
        let duration = self.duration();
        (!duration.is_unbounded()).then(|| self.start().saturating_add(duration))
    }

    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    pub fn set_loop(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }
}

impl Default for PlayWindow {
    fn default() -> Self {
        Self::new(Pts::ZERO, MediaDuration::UNBOUNDED, false)
    }
}

const NO_SEEK: i64 = -1;

/**
    A single pending seek position. A newer request replaces an older one
    that has not been consumed yet.
*/
#[derive(Debug)]
pub struct SeekRequest {
    pending: AtomicI64,
}

impl SeekRequest {
    pub const fn new() -> Self {
        Self {
            pending: AtomicI64::new(NO_SEEK),
        }
    }

    /// Negative positions are clamped to zero.
    pub fn request(&self, position: Pts) {
        self.pending.store(position.0.max(0), Ordering::Release);
    }

    /**
        Consume the pending request, if any.
    */
    pub fn take(&self) -> Option<Pts> {
        let position = self.pending.swap(NO_SEEK, Ordering::AcqRel);
        (position >= 0).then_some(Pts(position))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= 0
    }
}

impl Default for SeekRequest {
    fn default() -> Self {
        Self::new()
    }
}
