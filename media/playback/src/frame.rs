use media_types::{HostFrame, MediaDuration, MediaSample, ScaleMode, VideoFormat};

/**
    Converts decoded video samples into host frames placed inside the
    output format.
*/
#[derive(Debug, Clone)]
pub struct FrameFactory {
    format: VideoFormat,
    scale_mode: ScaleMode,
}

impl FrameFactory {
    pub fn new(format: VideoFormat, scale_mode: ScaleMode) -> Self {
        Self { format, scale_mode }
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    /**
        Number of output fields a frame of `duration` covers, at least one.
    */
    pub fn fields_spanned(&self, duration: MediaDuration) -> u64 {
        let field = self.format.field_duration().0.max(1);
        let duration = if duration.0 > 0 {
            duration.0
        } else {
            self.format.frame_duration().0
        };
        ((duration + field / 2) / field).max(1) as u64
    }

    /**
        Build the host frame for `sample`. Returns `None` for non-video samples.

        Samples without a duration are shown for one output frame.
    */
    pub fn make_frame(&self, sample: &MediaSample, sequence: u64) -> Option<HostFrame> {
        let mut frame = HostFrame::from_sample(sample, sequence, Default::default())?;
        frame.geometry = self.scale_mode.geometry(
            frame.width,
            frame.height,
            self.format.width,
            self.format.height,
        );
        if frame.duration.0 <= 0 {
            frame.duration = self.format.frame_duration();
        }
        Some(frame)
    }

    /**
        Full-format black frame shown before any source frame arrives.
    */
    pub fn black(&self) -> HostFrame {
        let mut frame = HostFrame::black(self.format.width, self.format.height);
        frame.duration = self.format.frame_duration();
        frame
    }
}

#[cfg(test)]
mod tests {
    use media_types::{FrameGeometry, PixelFormat, Pts, Rational};

    use super::*;

    fn sample(width: u32, height: u32, duration: i64) -> MediaSample {
        MediaSample::video(
            vec![0u8; PixelFormat::Bgra.frame_size(width, height)],
            width,
            height,
            PixelFormat::Bgra,
            Pts(0),
            MediaDuration(duration),
        )
    }

    #[test]
    fn field_span() {
        let interlaced = FrameFactory::new(
            VideoFormat::by_name("1080i5000").unwrap(),
            ScaleMode::Stretch,
        );
        assert_eq!(interlaced.fields_spanned(MediaDuration(40_000)), 2);
        assert_eq!(interlaced.fields_spanned(MediaDuration(20_000)), 1);
        assert_eq!(interlaced.fields_spanned(MediaDuration(1)), 1);
        assert_eq!(interlaced.fields_spanned(MediaDuration::ZERO), 2);

        let progressive = FrameFactory::new(VideoFormat::default(), ScaleMode::Stretch);
        assert_eq!(progressive.fields_spanned(MediaDuration(40_000)), 1);
    }

    #[test]
    fn geometry_follows_scale_mode() {
        let format = VideoFormat::new("test", 64, 36, Rational::new(25, 1), 1);
        let factory = FrameFactory::new(format, ScaleMode::Fit);
        let frame = factory.make_frame(&sample(36, 36, 40_000), 3).unwrap();
        assert_eq!(
            frame.geometry,
            FrameGeometry {
                x: 14,
                y: 0,
                width: 36,
                height: 36
            }
        );
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn missing_duration_is_one_frame() {
        let factory = FrameFactory::new(VideoFormat::default(), ScaleMode::Stretch);
        let frame = factory.make_frame(&sample(2, 2, 0), 0).unwrap();
        assert_eq!(frame.duration, MediaDuration(40_000));

        let black = factory.black();
        assert_eq!((black.width, black.height), (1920, 1080));
    }
}
