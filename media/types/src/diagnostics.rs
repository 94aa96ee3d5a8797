/*!
    Write-only diagnostics channel.

    Adapters report named values (buffer depth, frame time) and tags (seek,
    underflow, dropped-frame) through [`Diagnostics`]. The channel never feeds
    back into pipeline behavior.
*/

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/**
    How noteworthy a diagnostic tag is.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/**
    Sink for diagnostic values and tags.
*/
pub trait Diagnostics: Send + Sync {
    /// Record the latest value of a named gauge.
    fn set_value(&self, name: &str, value: f64);

    /// Record that a named event happened.
    fn tag(&self, severity: Severity, name: &str);
}

pub type SharedDiagnostics = Arc<dyn Diagnostics>;

/**
    Diagnostics forwarded to `tracing`.

    Values are emitted at trace level, tags at a level matching their severity.
*/
#[derive(Clone, Debug)]
pub struct TracingDiagnostics {
    scope: String,
}

impl TracingDiagnostics {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn shared(scope: impl Into<String>) -> SharedDiagnostics {
        Arc::new(Self::new(scope))
    }
}

impl Diagnostics for TracingDiagnostics {
    fn set_value(&self, name: &str, value: f64) {
        tracing::trace!(scope = %self.scope, name, value, "diagnostic value");
    }

    fn tag(&self, severity: Severity, name: &str) {
        match severity {
            Severity::Info => tracing::debug!(scope = %self.scope, tag = name, "diagnostic tag"),
            Severity::Warning => tracing::warn!(scope = %self.scope, tag = name, "diagnostic tag"),
            Severity::Error => tracing::error!(scope = %self.scope, tag = name, "diagnostic tag"),
        }
    }
}

/**
    Diagnostics kept in memory: tag counts per severity and the last value
    of each gauge.
*/
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    values: Mutex<HashMap<String, f64>>,
    tags: Mutex<HashMap<(String, Severity), u64>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag_count(&self, name: &str) -> u64 {
        self.tags
            .lock()
            .iter()
            .filter(|((tag, _), _)| tag == name)
            .map(|(_, count)| count)
            .sum()
    }

    pub fn tag_count_at(&self, severity: Severity, name: &str) -> u64 {
        self.tags
            .lock()
            .get(&(name.to_owned(), severity))
            .copied()
            .unwrap_or(0)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.lock().get(name).copied()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn set_value(&self, name: &str, value: f64) {
        self.values.lock().insert(name.to_owned(), value);
    }

    fn tag(&self, severity: Severity, name: &str) {
        *self
            .tags
            .lock()
            .entry((name.to_owned(), severity))
            .or_default() += 1;
    }
}

static_assertions::assert_impl_all!(RecordingDiagnostics: Send, Sync, Diagnostics);

/**
    Rate limiter for warnings that repeat on every miss of a polling loop.

    Counts misses and fires on miss number `first`, then every `period`
    misses after that. `reset` clears the count once the condition is gone.
*/
#[derive(Debug)]
pub struct Debounce {
    misses: AtomicU64,
    first: u64,
    period: u64,
}

impl Debounce {
    /**
        # Panics

        Panics if `period` is zero.
    */
    pub const fn new(first: u64, period: u64) -> Self {
        assert!(period > 0, "period cannot be zero");
        Self {
            misses: AtomicU64::new(0),
            first,
            period,
        }
    }

    /**
        Count one miss. Returns true if this miss should be reported.
    */
    pub fn hit(&self) -> bool {
        let n = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        n >= self.first && (n - self.first) % self.period == 0
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /**
        Clear the miss count, returning how many misses had accumulated.
    */
    pub fn reset(&self) -> u64 {
        self.misses.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_counts_tags() {
        let diag = RecordingDiagnostics::new();
        diag.tag(Severity::Info, "seek");
        diag.tag(Severity::Info, "seek");
        diag.tag(Severity::Warning, "underflow");
        diag.set_value("buffer", 3.0);
        diag.set_value("buffer", 5.0);

        assert_eq!(diag.tag_count("seek"), 2);
        assert_eq!(diag.tag_count("underflow"), 1);
        assert_eq!(diag.tag_count_at(Severity::Warning, "underflow"), 1);
        assert_eq!(diag.tag_count_at(Severity::Info, "underflow"), 0);
        assert_eq!(diag.tag_count("dropped-frame"), 0);
        assert_eq!(diag.value("buffer"), Some(5.0));
    }

    #[test]
    fn debounce_fires_on_first_then_periodically() {
        let debounce = Debounce::new(3, 5);
        let fired: Vec<u64> = (1..=20).filter(|_| debounce.hit()).map(|_| debounce.misses()).collect();
        assert_eq!(fired, vec![3, 8, 13, 18]);
        assert_eq!(debounce.reset(), 20);
        assert_eq!(debounce.misses(), 0);
    }

    #[test]
    fn tracing_diagnostics_is_shareable() {
        let diag = TracingDiagnostics::shared("test");
        diag.tag(Severity::Info, "seek");
        diag.set_value("frame-time", 1.0);
    }
}
