/*!
    Engine status events.
*/

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::EngineState;

/**
    Status messages an engine posts from its own threads.
*/
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The engine finished a state change.
    StateChanged { old: EngineState, new: EngineState },
    /**
        No more samples will be produced (decode), or the output was finalized
        (encode). Decoders report the flush segment the stream ended in, so an
        end-of-stream from before a flushing seek can be told apart.
    */
    Eos { segment: u64 },
    /// A runtime failure. The engine stops producing until it is reset or seeked.
    Error {
        message: String,
        debug: Option<String>,
    },
    Warning { message: String },
    /// The engine learned (or revised) the stream duration.
    DurationChanged,
}

/**
    Multi-producer event channel between an engine and its monitor.

    Posting never blocks. The monitor drains the bus with [`EventBus::timed_pop`]
    so that it can observe its stop flag at least once per timeout.
*/
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn post(&self, event: EngineEvent) {
        // Both ends live in `self`, so the channel cannot be disconnected here
        let _ = self.tx.send(event);
    }

    pub fn post_error(&self, message: impl Into<String>) {
        self.post(EngineEvent::Error {
            message: message.into(),
            debug: None,
        });
    }

    /**
        Wait up to `timeout` for the next event.
    */
    pub fn timed_pop(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /**
        Discard all pending events.
    */
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn timed_pop_returns_posted_events_in_order() {
        let bus = EventBus::new();
        bus.post(EngineEvent::Eos { segment: 0 });
        bus.post_error("boom");
        assert_eq!(
            bus.timed_pop(Duration::from_millis(10)),
            Some(EngineEvent::Eos { segment: 0 })
        );
        assert!(matches!(
            bus.timed_pop(Duration::from_millis(10)),
            Some(EngineEvent::Error { message, .. }) if message == "boom"
        ));
    }

    #[test]
    fn timed_pop_is_bounded() {
        let bus = EventBus::new();
        let started = Instant::now();
        assert_eq!(bus.timed_pop(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn clones_share_the_channel() {
        let bus = EventBus::new();
        let poster = bus.clone();
        std::thread::spawn(move || poster.post(EngineEvent::DurationChanged))
            .join()
            .unwrap();
        assert_eq!(bus.try_pop(), Some(EngineEvent::DurationChanged));
        bus.post(EngineEvent::Eos { segment: 0 });
        bus.clear();
        assert_eq!(bus.try_pop(), None);
    }
}
