/*!
    Host-native frames.
*/

use bytes::Bytes;

use crate::{FrameGeometry, MediaDuration, MediaSample, PixelFormat, Pts, SampleCaps};

/**
    A video frame in the form the host consumes and produces.

    The pixel payload shares its allocation with the decoded sample it was
    built from, so handing frames around never copies pixels. Audio blocks
    that play during this frame travel with it.
*/
#[derive(Clone, Debug)]
pub struct HostFrame {
    /// Packed pixel data.
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp in ticks.
    pub pts: Pts,
    /// How long this frame is shown. Extended when the frame is held.
    pub duration: MediaDuration,
    /**
        Position of this frame in the delivered stream, counted in output
        fields. Strictly increasing between seeks.
    */
    pub sequence: u64,
    /// Where the frame lands inside the output format.
    pub geometry: FrameGeometry,
    /// Interleaved audio blocks that start during this frame.
    pub audio: Vec<MediaSample>,
}

impl HostFrame {
    /**
        Build a host frame from a decoded video sample.

        Returns `None` if the sample does not carry video.
    */
    pub fn from_sample(sample: &MediaSample, sequence: u64, geometry: FrameGeometry) -> Option<Self> {
        let SampleCaps::Video {
            width,
            height,
            format,
        } = sample.caps()
        else {
            return None;
        };
        Some(Self {
            data: sample.data().clone(),
            width,
            height,
            format,
            pts: sample.pts(),
            duration: sample.duration(),
            sequence,
            geometry,
            audio: Vec::new(),
        })
    }

    /**
        A solid black BGRA frame, used before any source frame exists.
    */
    pub fn black(width: u32, height: u32) -> Self {
        let size = PixelFormat::Bgra.frame_size(width, height);
        let mut pixels = vec![0u8; size];
        for alpha in pixels.iter_mut().skip(3).step_by(4) {
            *alpha = 0xFF;
        }
        Self {
            data: Bytes::from(pixels),
            width,
            height,
            format: PixelFormat::Bgra,
            pts: Pts::ZERO,
            duration: MediaDuration::ZERO,
            sequence: 0,
            geometry: FrameGeometry {
                x: 0,
                y: 0,
                width,
                height,
            },
            audio: Vec::new(),
        }
    }

    pub fn end(&self) -> Pts {
        self.pts.saturating_add(self.duration)
    }
}

static_assertions::assert_impl_all!(HostFrame: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelLayout, SampleFormat};

    #[test]
    fn from_video_sample_shares_payload() {
        let sample = MediaSample::video(
            vec![7u8; 16],
            2,
            2,
            PixelFormat::Bgra,
            Pts(40_000),
            MediaDuration(40_000),
        );
        let frame = HostFrame::from_sample(&sample, 4, FrameGeometry::default()).unwrap();
        assert_eq!(frame.data.as_ptr(), sample.data().as_ptr());
        assert_eq!(frame.sequence, 4);
        assert_eq!(frame.end(), Pts(80_000));
    }

    #[test]
    fn audio_sample_is_rejected() {
        let sample = MediaSample::audio(
            vec![0u8; 8],
            48_000,
            ChannelLayout::Stereo,
            SampleFormat::S32,
            Pts(0),
            MediaDuration(20),
        );
        assert!(HostFrame::from_sample(&sample, 0, FrameGeometry::default()).is_none());
    }

    #[test]
    fn black_frame_is_opaque() {
        let frame = HostFrame::black(2, 1);
        assert_eq!(&frame.data[..], &[0, 0, 0, 0xFF, 0, 0, 0, 0xFF]);
    }
}
