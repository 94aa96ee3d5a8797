/*!
    A minimal host: pulls fields from a scheduler and optionally pushes the
    resulting frames into an egress adapter.
*/

use std::thread;
use std::time::Duration;

use media_egress::EgressAdapter;
use media_playback::{FramePull, PlaybackScheduler};
use media_types::{Field, Pts, WallClock};

/// Back-off between pulls while an unpaced host waits for a fresh frame.
const UNPACED_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default)]
pub struct HostOptions {
    /// Stop after this many output frames.
    pub frames: Option<u64>,
    /**
        Pull at the output field rate. An unpaced host pulls as fast as the
        source decodes and only forwards fresh frames.
    */
    pub paced: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostReport {
    pub frames: u64,
    pub fresh: u64,
    pub held: u64,
    pub underflows: u64,
    /// The egress stopped accepting frames before the host was done.
    pub egress_stopped: bool,
}

pub fn run(
    scheduler: &PlaybackScheduler,
    egress: Option<&EgressAdapter>,
    options: HostOptions,
) -> HostReport {
    let format = scheduler.format().clone();
    let field_duration = format.field_duration();
    let status_interval = u64::from(format.fps_rounded());
    let clock = WallClock::new();

    let mut report = HostReport::default();
    let mut field_index: i64 = 0;

    while !options.frames.is_some_and(|limit| report.frames >= limit) {
        let field = if format.is_interlaced() {
            Field::for_index(field_index as u64)
        } else {
            Field::A
        };
        if options.paced {
            let due = Pts(field_duration.0.saturating_mul(field_index));
            thread::sleep(clock.until(due));
        }

        let pull = scheduler.advance_frame(field);
        field_index += 1;
        if field == Field::B {
            continue;
        }

        // Field A only holds once the window or the source has ended
        let at_end = matches!(pull, FramePull::Held(_)) && !scheduler.window().looping();
        match &pull {
            FramePull::Fresh(_) => report.fresh += 1,
            FramePull::Held(_) => report.held += 1,
            FramePull::Underflow(_) => report.underflows += 1,
        }

        if !options.paced && !pull.is_fresh() {
            if at_end {
                break;
            }
            // Unpaced hosts do not consume a field until a frame is ready
            field_index -= 1;
            thread::sleep(UNPACED_RETRY);
            continue;
        }

        report.frames += 1;
        if report.frames % status_interval == 0 {
            tracing::debug!(
                status = %scheduler,
                playhead = %scheduler.playhead(),
                buffered = scheduler.buffered(),
                "host tick"
            );
        }

        if let Some(egress) = egress {
            if !egress.submit(pull.into_frame()) {
                tracing::warn!(destination = egress.destination(), "egress stopped accepting frames");
                report.egress_stopped = true;
                break;
            }
        }

        if at_end && options.frames.is_none() {
            break;
        }
    }

    tracing::info!(
        frames = report.frames,
        fresh = report.fresh,
        held = report.held,
        underflows = report.underflows,
        "host finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use media_egress::EgressConfig;
    use media_engine::{DefaultEngineFactory, EncoderStats};
    use media_ingest::IngestConfig;
    use media_playback::{PlaybackConfig, ProducerParams};
    use media_types::{Rational, VideoFormat};

    use super::*;

    fn format(fields: u32) -> VideoFormat {
        VideoFormat::new("test", 64, 36, Rational::new(25, 1), fields)
    }

    fn scheduler(params: ProducerParams, format: VideoFormat) -> PlaybackScheduler {
        PlaybackScheduler::open(
            &params,
            PlaybackConfig::new(format),
            IngestConfig::default(),
            DefaultEngineFactory::shared(),
        )
        .unwrap()
    }

    #[test]
    fn unpaced_host_forwards_every_source_frame_once() {
        let stats = EncoderStats::new();
        let factory = Arc::new(DefaultEngineFactory::new().with_encoder_stats(stats.clone()));
        let scheduler = scheduler(ProducerParams::new("testsrc://?duration=2"), format(1));
        let egress = EgressAdapter::open(&EgressConfig::new("null://"), scheduler.format(), factory)
            .unwrap();

        let report = run(
            &scheduler,
            Some(&egress),
            HostOptions {
                frames: None,
                paced: false,
            },
        );
        egress.finish().unwrap();

        assert_eq!(report.frames, 50);
        assert_eq!(report.fresh, 50);
        assert!(!report.egress_stopped);
        assert_eq!(stats.video_frames(), 50);
    }

    #[test]
    fn frame_limit_stops_a_looping_source() {
        let scheduler = scheduler(
            ProducerParams::new("testsrc://?duration=1").with_loop(true),
            format(2),
        );
        let report = run(
            &scheduler,
            None,
            HostOptions {
                frames: Some(40),
                paced: false,
            },
        );
        assert_eq!(report.frames, 40);
        assert_eq!(report.fresh, 40);
    }

    #[test]
    fn paced_host_counts_fields_as_frames() {
        let scheduler = scheduler(ProducerParams::new("testsrc://?duration=10"), format(2));
        let report = run(
            &scheduler,
            None,
            HostOptions {
                frames: Some(10),
                paced: true,
            },
        );
        assert_eq!(report.frames, 10);
        assert_eq!(report.fresh + report.held + report.underflows, 10);
    }
}
