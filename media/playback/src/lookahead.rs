use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use media_types::{HostFrame, MediaDuration, MediaSample, Pts};

/// Longest single wait of a producer blocked on a full buffer.
const PRODUCER_WAIT: Duration = Duration::from_millis(50);

/**
    A converted frame waiting to be shown, together with the sample it was
    built from. Dropping it releases the sample.
*/
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub frame: HostFrame,
    pub sample: MediaSample,
}

impl BufferedFrame {
    pub fn pts(&self) -> Pts {
        self.frame.pts
    }

    pub fn duration(&self) -> MediaDuration {
        self.frame.duration
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }
}

#[derive(Debug, Default)]
pub struct Frames {
    frames: VecDeque<BufferedFrame>,
    generation: u64,
}

impl Frames {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn front(&self) -> Option<&BufferedFrame> {
        self.frames.front()
    }

    pub fn pop_front(&mut self) -> Option<BufferedFrame> {
        self.frames.pop_front()
    }
}

/**
    Small bounded deque of converted frames between the scheduler thread and
    the host.

    Guarded by one mutex, held only for constant-time operations. Every
    [`LookaheadBuffer::clear`] bumps a generation counter; the producer
    passes the generation it observed before fetching a sample, and pushes
    from an older generation are discarded.
*/
#[derive(Debug)]
pub struct LookaheadBuffer {
    capacity: usize,
    inner: Mutex<Frames>,
    space: Condvar,
}

impl LookaheadBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Frames::default()),
            space: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /**
        Lock the buffer for a host-side decision. Call [`LookaheadBuffer::notify`]
        after popping so a blocked producer can continue.
    */
    pub fn lock(&self) -> MutexGuard<'_, Frames> {
        self.inner.lock()
    }

    pub fn notify(&self) {
        self.space.notify_all();
    }

    /**
        Append `frame`, waiting while the buffer is full.

        Returns false without pushing if the buffer was cleared since
        `generation` was observed, or if `stop` is raised while waiting.
    */
    pub fn push_wait(&self, frame: BufferedFrame, generation: u64, stop: &AtomicBool) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if inner.generation != generation || stop.load(Ordering::Acquire) {
                return false;
            }
            if inner.frames.len() < self.capacity {
                inner.frames.push_back(frame);
                return true;
            }
            self.space.wait_for(&mut inner, PRODUCER_WAIT);
        }
    }

    /**
        Drop every buffered frame and start a new generation.
    */
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        inner.generation += 1;
        drop(inner);
        self.space.notify_all();
        dropped
    }

    /**
        Fill level between 0 and 1.
    */
    pub fn fill(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use media_types::{FrameGeometry, PixelFormat};

    use super::*;

    fn buffered(sequence: u64) -> BufferedFrame {
        let sample = MediaSample::video(
            vec![0u8; 4],
            1,
            1,
            PixelFormat::Bgra,
            Pts(sequence as i64 * 40_000),
            MediaDuration(40_000),
        );
        let frame = HostFrame::from_sample(&sample, sequence, FrameGeometry::default()).unwrap();
        BufferedFrame { frame, sample }
    }

    #[test]
    fn push_blocks_until_host_pops() {
        let buffer = Arc::new(LookaheadBuffer::new(2));
        let stop = Arc::new(AtomicBool::new(false));
        assert!(buffer.push_wait(buffered(0), 0, &stop));
        assert!(buffer.push_wait(buffered(1), 0, &stop));

        let producer = {
            let buffer = buffer.clone();
            let stop = stop.clone();
            thread::spawn(move || buffer.push_wait(buffered(2), 0, &stop))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(buffer.len(), 2);

        let popped = buffer.lock().pop_front().map(|f| f.sequence());
        buffer.notify();
        assert_eq!(popped, Some(0));
        assert!(producer.join().unwrap());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn clear_rejects_pushes_from_older_generation() {
        let buffer = Arc::new(LookaheadBuffer::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        assert!(buffer.push_wait(buffered(0), 0, &stop));

        let producer = {
            let buffer = buffer.clone();
            let stop = stop.clone();
            thread::spawn(move || buffer.push_wait(buffered(1), 0, &stop))
        };
        thread::sleep(Duration::from_millis(20));
        let weak = buffer.lock().front().map(|f| f.sample.downgrade());

        assert_eq!(buffer.clear(), 1);
        assert!(!producer.join().unwrap());
        assert!(buffer.is_empty());
        assert!(weak.is_some_and(|w| !w.is_alive()));
        assert_eq!(buffer.generation(), 1);
    }

    #[test]
    fn stop_releases_a_blocked_producer() {
        let buffer = Arc::new(LookaheadBuffer::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        assert!(buffer.push_wait(buffered(0), 0, &stop));

        let producer = {
            let buffer = buffer.clone();
            let stop = stop.clone();
            thread::spawn(move || buffer.push_wait(buffered(1), 0, &stop))
        };
        stop.store(true, Ordering::Release);
        assert!(!producer.join().unwrap());
        assert!((buffer.fill() - 1.0).abs() < f64::EPSILON);
    }
}
