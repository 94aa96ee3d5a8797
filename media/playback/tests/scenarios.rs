use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use media_engine::{DefaultEngineFactory, frame_index};
use media_ingest::IngestConfig;
use media_playback::{FramePull, PlaybackConfig, PlaybackScheduler, PlayheadState, ProducerParams};
use media_types::{
    EngineError, Field, HostFrame, MediaDuration, Pts, Rational, RecordingDiagnostics, Severity,
    VideoFormat,
};

fn progressive() -> VideoFormat {
    VideoFormat::new("test-p", 64, 36, Rational::new(25, 1), 1)
}

fn interlaced() -> VideoFormat {
    VideoFormat::new("test-i", 64, 36, Rational::new(25, 1), 2)
}

fn open(params: ProducerParams, format: VideoFormat) -> PlaybackScheduler {
    PlaybackScheduler::open(
        &params,
        PlaybackConfig::new(format),
        IngestConfig::default(),
        DefaultEngineFactory::shared(),
    )
    .unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Pull field A until `count` fresh frames arrived.
fn pull_fresh(scheduler: &PlaybackScheduler, count: usize) -> Vec<HostFrame> {
    let mut frames = Vec::with_capacity(count);
    let deadline = Instant::now() + Duration::from_secs(20);
    while frames.len() < count {
        assert!(Instant::now() < deadline, "only {} fresh frames", frames.len());
        match scheduler.advance_frame(Field::A) {
            FramePull::Fresh(frame) => frames.push(frame),
            _ => thread::sleep(Duration::from_millis(1)),
        }
    }
    frames
}

fn index(frame: &HostFrame) -> Option<u64> {
    frame_index(&frame.data)
}

#[test]
fn bounded_window_holds_last_frame_at_end() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10").with_length(250),
        progressive(),
    );

    let frames = pull_fresh(&scheduler, 250);
    let indices: Vec<_> = frames.iter().filter_map(index).collect();
    assert_eq!(indices, (0..250).collect::<Vec<_>>());
    assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));

    for _ in 0..20 {
        let pull = scheduler.advance_frame(Field::A);
        assert!(matches!(pull, FramePull::Held(_)), "{pull:?}");
        assert_eq!(index(pull.frame()), Some(249));
    }
    assert_eq!(scheduler.position(), Pts::from_secs_f64(10.0));
    assert!(wait_until(|| scheduler.eof()));
}

#[test]
fn looping_window_wraps_to_start() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10")
            .with_length(250)
            .with_loop(true),
        progressive(),
    );

    let frames = pull_fresh(&scheduler, 261);
    assert_eq!(index(&frames[249]), Some(249));
    assert_eq!(index(&frames[250]), Some(0));
    assert_eq!(index(&frames[260]), Some(10));
    assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(!scheduler.eof());
}

#[test]
fn short_window_loops_inside_the_source() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10")
            .with_in(50)
            .with_length(10)
            .with_loop(true),
        progressive(),
    );

    let indices: Vec<_> = pull_fresh(&scheduler, 25).iter().filter_map(index).collect();
    let expected: Vec<u64> = (0..25).map(|n| 50 + n % 10).collect();
    assert_eq!(indices, expected);
}

#[test]
fn unopenable_locators_fail_construction() {
    let diagnostics = Arc::new(RecordingDiagnostics::new());
    for locator in [
        "/definitely/not/here.mov",
        "nosuchproto://host/stream",
        "testsrc://?fail=geometry",
    ] {
        let result = PlaybackScheduler::open_with_diagnostics(
            &ProducerParams::new(locator),
            PlaybackConfig::default(),
            IngestConfig::default(),
            DefaultEngineFactory::shared(),
            diagnostics.clone(),
        );
        assert!(
            matches!(result, Err(EngineError::InvalidSource { .. })),
            "{locator}"
        );
    }
    assert_eq!(diagnostics.tag_count("thread-start"), 0);

    // Ingest monitor plus scheduler thread
    let scheduler = PlaybackScheduler::open_with_diagnostics(
        &ProducerParams::new("testsrc://?duration=1"),
        PlaybackConfig::new(progressive()),
        IngestConfig::default(),
        DefaultEngineFactory::shared(),
        diagnostics.clone(),
    )
    .unwrap();
    assert_eq!(diagnostics.tag_count("thread-start"), 2);
    drop(scheduler);
}

#[test]
fn repeated_seek_lands_once() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=10"), progressive());
    pull_fresh(&scheduler, 10);

    scheduler.seek_to(Pts::from_secs_f64(2.0));
    scheduler.seek_to(Pts::from_secs_f64(2.0));
    let after = pull_fresh(&scheduler, 3);
    let indices: Vec<_> = after.iter().filter_map(index).collect();
    assert_eq!(indices, vec![50, 51, 52]);
}

#[test]
fn latest_seek_wins() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=10"), progressive());
    pull_fresh(&scheduler, 5);

    scheduler.seek_to(Pts::from_secs_f64(8.0));
    scheduler.seek_to(Pts::from_secs_f64(4.0));
    let first = pull_fresh(&scheduler, 1).remove(0);
    assert_eq!(index(&first), Some(100));
}

#[test]
fn nothing_from_before_a_seek_is_shown_after_it() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=10"), progressive());
    pull_fresh(&scheduler, 5);
    assert!(wait_until(|| scheduler.buffered() > 0));

    let target = Pts::from_secs_f64(6.0);
    scheduler.seek_to(target);
    assert_eq!(scheduler.position(), target);

    let frames = pull_fresh(&scheduler, 20);
    assert!(frames.iter().all(|frame| frame.pts >= target));
    assert_eq!(frames[0].sequence, 0);
    assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[test]
fn field_b_repeats_field_a() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=10"), interlaced());
    pull_fresh(&scheduler, 1);

    for _ in 0..30 {
        let a = scheduler.advance_frame(Field::A);
        let b = scheduler.advance_frame(Field::B);
        assert!(matches!(b, FramePull::Held(_)));
        assert_eq!(a.frame().data, b.frame().data);
        assert_eq!(a.frame().pts, b.frame().pts);
    }
}

#[test]
fn frames_starting_on_field_b_are_skipped() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10&fps=50"),
        interlaced(),
    );

    let frames = pull_fresh(&scheduler, 10);
    assert!(frames.iter().all(|frame| frame.sequence % 2 == 0));
    assert!(frames.iter().filter_map(index).all(|index| index % 2 == 0));
}

#[test]
fn stalled_source_repeats_last_frame() {
    let diagnostics = Arc::new(RecordingDiagnostics::new());
    let scheduler = PlaybackScheduler::open_with_diagnostics(
        &ProducerParams::new("testsrc://?live=1&duration=0"),
        PlaybackConfig::new(progressive()),
        IngestConfig::default(),
        DefaultEngineFactory::shared(),
        diagnostics.clone(),
    )
    .unwrap();

    let mut last = pull_fresh(&scheduler, 1).remove(0);
    let mut underflow = None;
    for _ in 0..50 {
        match scheduler.advance_frame(Field::A) {
            FramePull::Fresh(frame) => last = frame,
            FramePull::Underflow(frame) => {
                underflow = Some(frame);
                break;
            }
            FramePull::Held(_) => {}
        }
    }
    let underflow = underflow.expect("a paced source cannot keep up with an unpaced host");
    assert_eq!(underflow.data, last.data);
    assert_eq!(scheduler.playhead(), PlayheadState::Underflow);
    assert!(diagnostics.tag_count("underflow") >= 1);
    assert_eq!(diagnostics.tag_count_at(Severity::Warning, "underflow"), 0);
    assert!(scheduler.is_ready());
}

#[test]
fn audio_travels_with_its_frame() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=2"), progressive());
    let frames = pull_fresh(&scheduler, 20);
    let paired = frames.iter().filter(|frame| !frame.audio.is_empty()).count();
    assert!(paired >= 18, "{paired} frames carried audio");
    for frame in &frames {
        assert!(frame.audio.iter().all(|block| block.pts() < frame.end()));
    }
}

#[test]
fn host_commands_edit_the_window() {
    let scheduler = open(ProducerParams::new("testsrc://?duration=10"), progressive());

    assert_eq!(scheduler.call(&["LOOP"]).unwrap(), "false");
    assert_eq!(scheduler.call(&["LOOP", "1"]).unwrap(), "true");
    assert_eq!(scheduler.call(&["LENGTH"]).unwrap(), "0");
    assert_eq!(scheduler.call(&["OUT"]).unwrap(), "10000000");

    assert_eq!(scheduler.call(&["IN", "1000000"]).unwrap(), "1000000");
    assert_eq!(scheduler.call(&["OUT", "3000000"]).unwrap(), "3000000");
    assert_eq!(scheduler.call(&["LENGTH"]).unwrap(), "2000000");
    assert_eq!(scheduler.window().duration(), MediaDuration(2_000_000));

    assert_eq!(scheduler.call(&["SEEK", "IN", "40000"]).unwrap(), "1040000");
    assert_eq!(scheduler.call(&["SEEK", "END", "-40000"]).unwrap(), "9960000");
    assert_eq!(scheduler.call(&["SEEK", "-5"]).unwrap(), "0");
    assert!(scheduler.call(&["PLAY"]).is_err());
}

#[test]
fn status_and_display() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10").with_length(50),
        progressive(),
    );
    assert_eq!(scheduler.to_string(), "media[testsrc|0.0000/2.0000]");
    assert_eq!(scheduler.nb_frames(), 50);

    pull_fresh(&scheduler, 25);
    let status = scheduler.status();
    assert_eq!(status.name, "testsrc");
    assert_eq!(status.clip, (0.0, 2.0));
    assert_eq!(status.time, (0.96, 10.0));
    assert_eq!(status.playhead, PlayheadState::Playing);
    assert!(status.ready);
    assert_eq!(scheduler.frame_number(), 25);
}

#[test]
fn source_errors_make_the_producer_not_ready() {
    let scheduler = open(
        ProducerParams::new("testsrc://?duration=10&error_at=20"),
        progressive(),
    );
    // Frames decoded before the failure still play
    pull_fresh(&scheduler, 5);

    assert!(wait_until(|| scheduler.last_error().is_some() && !scheduler.is_ready()));
    assert!(
        scheduler
            .last_error()
            .is_some_and(|error| error.contains("frame 20"))
    );

    // Stays not ready while the host keeps pulling
    for _ in 0..50 {
        scheduler.advance_frame(Field::A);
    }
    thread::sleep(Duration::from_millis(100));
    assert!(!scheduler.is_ready());
}
