/*!
    Host frame to engine sample conversion.
*/

use media_types::{HostFrame, MediaDuration, MediaSample, Pts, Rational, SampleCaps};

/**
    Restamps host frames with timestamps counted from zero.

    Video timing comes from a frame counter at the output frame rate and
    audio timing from a running count of audio frames, never from the wall
    clock, so encoding slower or faster than realtime gives the same output.
*/
#[derive(Debug, Clone)]
pub struct SampleStamper {
    frame_rate: Rational,
    video_frames: i64,
    audio_frames: i64,
}

impl SampleStamper {
    pub fn new(frame_rate: Rational) -> Self {
        Self {
            frame_rate,
            video_frames: 0,
            audio_frames: 0,
        }
    }

    /// Frames stamped so far.
    pub fn frames(&self) -> i64 {
        self.video_frames
    }

    /**
        Convert one host frame into its video sample followed by its audio
        blocks.
    */
    pub fn convert(&mut self, frame: &HostFrame) -> Vec<MediaSample> {
        let mut samples = Vec::with_capacity(1 + frame.audio.len());
        samples.push(self.video(frame));
        samples.extend(frame.audio.iter().filter_map(|block| self.audio(block)));
        samples
    }

    pub fn video(&mut self, frame: &HostFrame) -> MediaSample {
        let start = MediaDuration::frames(self.video_frames, self.frame_rate);
        let end = MediaDuration::frames(self.video_frames + 1, self.frame_rate);
        self.video_frames += 1;
        MediaSample::video(
            frame.data.clone(),
            frame.width,
            frame.height,
            frame.format,
            Pts(start.0),
            MediaDuration(end.0 - start.0),
        )
    }

    /**
        Restamp an audio block. Returns `None` for samples that are not audio.
    */
    pub fn audio(&mut self, block: &MediaSample) -> Option<MediaSample> {
        let SampleCaps::Audio { sample_rate, .. } = block.caps() else {
            return None;
        };
        let frames = i64::try_from(block.audio_frames()?).unwrap_or(i64::MAX);
        let rate = Rational::new(i32::try_from(sample_rate).unwrap_or(i32::MAX), 1);

        let start = MediaDuration::frames(self.audio_frames, rate);
        self.audio_frames = self.audio_frames.saturating_add(frames);
        let end = MediaDuration::frames(self.audio_frames, rate);
        Some(
            block
                .clone()
                .with_timing(Pts(start.0), MediaDuration(end.0 - start.0)),
        )
    }
}

#[cfg(test)]
mod tests {
    use media_types::{ChannelLayout, SampleFormat};

    use super::*;

    fn frame(pts: i64) -> HostFrame {
        let mut frame = HostFrame::black(4, 4);
        frame.pts = Pts(pts);
        frame
    }

    fn block(frames: usize) -> MediaSample {
        MediaSample::audio(
            vec![0u8; frames * 8],
            48_000,
            ChannelLayout::Stereo,
            SampleFormat::S32,
            Pts(987_654),
            MediaDuration::ZERO,
        )
    }

    #[test]
    fn video_is_stamped_by_frame_counter() {
        let mut stamper = SampleStamper::new(Rational::new(25, 1));
        let stamps: Vec<_> = [5_000_000, 0, 77]
            .into_iter()
            .map(|pts| {
                let sample = stamper.video(&frame(pts));
                (sample.pts(), sample.duration())
            })
            .collect();
        assert_eq!(
            stamps,
            vec![
                (Pts(0), MediaDuration(40_000)),
                (Pts(40_000), MediaDuration(40_000)),
                (Pts(80_000), MediaDuration(40_000)),
            ]
        );
        assert_eq!(stamper.frames(), 3);
    }

    #[test]
    fn fractional_rates_do_not_drift() {
        let mut stamper = SampleStamper::new(Rational::new(30_000, 1001));
        let mut last = None;
        for _ in 0..30_000 {
            last = Some(stamper.video(&frame(0)));
        }
        let last = last.unwrap();
        assert_eq!(last.end(), Pts(1_001_000_000));
    }

    #[test]
    fn audio_is_stamped_by_sample_count() {
        let mut stamper = SampleStamper::new(Rational::new(25, 1));
        let first = stamper.audio(&block(1920)).unwrap();
        let second = stamper.audio(&block(960)).unwrap();
        assert_eq!((first.pts(), first.duration()), (Pts(0), MediaDuration(40_000)));
        assert_eq!((second.pts(), second.duration()), (Pts(40_000), MediaDuration(20_000)));
    }

    #[test]
    fn frames_carry_their_audio() {
        let mut stamper = SampleStamper::new(Rational::new(25, 1));
        let mut host = frame(0);
        host.audio = vec![block(960), block(960)];
        let samples = stamper.convert(&host);
        assert_eq!(samples.len(), 3);
        assert!(matches!(samples[0].caps(), SampleCaps::Video { .. }));
        assert_eq!(samples[2].pts(), Pts(20_000));
    }
}
