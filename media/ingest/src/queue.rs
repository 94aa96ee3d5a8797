use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use media_engine::{AUDIO_SINK_CAPACITY, SampleSink, VIDEO_SINK_CAPACITY};
use media_types::MediaSample;

/**
    Bounded, thread-safe FIFO of media samples.

    Pushing never blocks and never evicts: a push into a full queue hands the
    sample back, and the caller decides whether to retry or drop it. The
    queue therefore never holds more than [`SampleQueue::capacity`] samples.
*/
#[derive(Debug)]
pub struct SampleQueue {
    name: &'static str,
    capacity: usize,
    tx: Sender<MediaSample>,
    rx: Receiver<MediaSample>,
    rejected: AtomicU64,
}

impl SampleQueue {
    /**
        Create a queue holding at most `capacity` samples.

        A capacity of zero is raised to one.
    */
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            name,
            capacity,
            tx,
            rx,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn video() -> Self {
        Self::new("video", VIDEO_SINK_CAPACITY)
    }

    pub fn audio() -> Self {
        Self::new("audio", AUDIO_SINK_CAPACITY)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /**
        Push without blocking. Returns the sample if the queue is full.
    */
    pub fn try_push(&self, sample: MediaSample) -> Result<(), MediaSample> {
        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(sample) | TrySendError::Disconnected(sample)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(sample)
            }
        }
    }

    pub fn try_pop(&self) -> Option<MediaSample> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /**
        Release every queued sample. Returns how many were dropped.
    */
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    /**
        Number of pushes refused because the queue was full.
    */
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl SampleSink for SampleQueue {
    fn try_push(&self, sample: MediaSample) -> Result<(), MediaSample> {
        SampleQueue::try_push(self, sample)
    }
}
