/*!
    Reference-counted media samples.
*/

use std::sync::{Arc, Weak};

use bytes::Bytes;

use crate::{ChannelLayout, MediaDuration, PixelFormat, Pts, SampleFormat};

/**
    Whether a sample carries video or audio.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Video,
    Audio,
}

/**
    Description of a sample's payload.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleCaps {
    Video {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Audio {
        sample_rate: u32,
        channels: ChannelLayout,
        format: SampleFormat,
    },
}

impl SampleCaps {
    pub const fn kind(&self) -> SampleKind {
        match self {
            Self::Video { .. } => SampleKind::Video,
            Self::Audio { .. } => SampleKind::Audio,
        }
    }
}

#[derive(Clone, Debug)]
struct SampleInner {
    caps: SampleCaps,
    data: Bytes,
    pts: Pts,
    duration: MediaDuration,
    segment: u64,
}

/**
    One timed unit of decoded or pre-encode media.

    Cloning a sample only bumps a reference count. The payload is released
    when the last clone is dropped, on whichever thread that happens, so a
    sample that was rejected by a full queue and handed back to its producer
    is released exactly once, by that producer.

    The `segment` number is assigned by decode engines and increases every time
    the engine is flushed by a seek. Consumers use it to discard samples that
    were produced before the most recent flush.
*/
#[derive(Clone, Debug)]
pub struct MediaSample {
    inner: Arc<SampleInner>,
}

static_assertions::assert_impl_all!(MediaSample: Send, Sync);

impl MediaSample {
    /**
        Create a video sample from a packed frame buffer.
    */
    pub fn video(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        pts: Pts,
        duration: MediaDuration,
    ) -> Self {
        Self::new(
            SampleCaps::Video {
                width,
                height,
                format,
            },
            data.into(),
            pts,
            duration,
        )
    }

    /**
        Create an interleaved audio sample.
    */
    pub fn audio(
        data: impl Into<Bytes>,
        sample_rate: u32,
        channels: ChannelLayout,
        format: SampleFormat,
        pts: Pts,
        duration: MediaDuration,
    ) -> Self {
        Self::new(
            SampleCaps::Audio {
                sample_rate,
                channels,
                format,
            },
            data.into(),
            pts,
            duration,
        )
    }

    fn new(caps: SampleCaps, data: Bytes, pts: Pts, duration: MediaDuration) -> Self {
        Self {
            inner: Arc::new(SampleInner {
                caps,
                data,
                pts,
                duration,
                segment: 0,
            }),
        }
    }

    /**
        Tag this sample with a flush segment.

        Copies the header (not the payload) if the sample is already shared.
    */
    pub fn with_segment(mut self, segment: u64) -> Self {
        Arc::make_mut(&mut self.inner).segment = segment;
        self
    }

    /**
        Restamp this sample, keeping its payload.
    */
    pub fn with_timing(mut self, pts: Pts, duration: MediaDuration) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.pts = pts;
        inner.duration = duration;
        self
    }

    pub fn kind(&self) -> SampleKind {
        self.inner.caps.kind()
    }

    pub fn caps(&self) -> SampleCaps {
        self.inner.caps
    }

    /**
        The payload. Cloning the returned `Bytes` shares the allocation.
    */
    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    pub fn pts(&self) -> Pts {
        self.inner.pts
    }

    pub fn duration(&self) -> MediaDuration {
        self.inner.duration
    }

    /**
        Timestamp one past the end of this sample.
    */
    pub fn end(&self) -> Pts {
        self.inner.pts.saturating_add(self.inner.duration)
    }

    pub fn segment(&self) -> u64 {
        self.inner.segment
    }

    /**
        Number of samples per channel, for audio samples.
    */
    pub fn audio_frames(&self) -> Option<usize> {
        match self.inner.caps {
            SampleCaps::Audio {
                channels, format, ..
            } => {
                let stride = channels.channels() as usize * format.bytes_per_sample();
                Some(self.inner.data.len() / stride)
            }
            SampleCaps::Video { .. } => None,
        }
    }

    /**
        Returns a weak handle that observes whether this sample is still held anywhere.
    */
    pub fn downgrade(&self) -> WeakSample {
        WeakSample {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /**
        Number of live handles to this sample.
    */
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/**
    Non-owning observer of a [`MediaSample`].
*/
#[derive(Clone, Debug)]
pub struct WeakSample {
    inner: Weak<SampleInner>,
}

impl WeakSample {
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<MediaSample> {
        self.inner.upgrade().map(|inner| MediaSample { inner })
    }
}
