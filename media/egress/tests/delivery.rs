use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use media_egress::{EgressAdapter, EgressConfig};
use media_engine::{DefaultEngineFactory, EncoderStats, EngineFactory};
use media_types::{
    ChannelLayout, EngineError, HostFrame, MediaDuration, MediaSample, PipelineState, Pts,
    Rational, RecordingDiagnostics, SampleFormat, VideoFormat,
};

fn format() -> VideoFormat {
    VideoFormat::new("test-p", 64, 36, Rational::new(25, 1), 1)
}

fn factory(stats: &Arc<EncoderStats>) -> Arc<dyn EngineFactory> {
    Arc::new(DefaultEngineFactory::new().with_encoder_stats(Arc::clone(stats)))
}

fn open(destination: &str, realtime: bool, stats: &Arc<EncoderStats>) -> EgressAdapter {
    let config = EgressConfig::new(destination).with_realtime(realtime);
    EgressAdapter::open(&config, &format(), factory(stats)).unwrap()
}

fn frame() -> HostFrame {
    HostFrame::black(64, 36)
}

#[test]
fn file_mode_delivers_every_frame_in_order() {
    let stats = EncoderStats::new();
    let egress = open("null://?delay_ms=2", false, &stats);
    assert!(!egress.is_realtime());

    for _ in 0..100 {
        assert!(egress.submit(frame()));
    }
    egress.finish().unwrap();

    assert_eq!(stats.video_frames(), 100);
    assert!(stats.eos_received());
    assert_eq!(egress.dropped(), 0);
    assert_eq!(egress.encoded(), 100);
    let timestamps = stats.video_timestamps();
    for (n, (pts, duration)) in timestamps.into_iter().enumerate() {
        assert_eq!(pts, Pts(n as i64 * 40_000));
        assert_eq!(duration, MediaDuration(40_000));
    }
}

#[test]
fn file_mode_submit_waits_for_the_encoder() {
    let stats = EncoderStats::new();
    let egress = open("null://?delay_ms=20", false, &stats);

    let started = Instant::now();
    for _ in 0..70 {
        assert!(egress.submit(frame()));
    }
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(egress.dropped(), 0);
}

#[test]
fn realtime_mode_drops_instead_of_blocking() {
    let stats = EncoderStats::new();
    let diagnostics = Arc::new(RecordingDiagnostics::new());
    let config = EgressConfig::new("null://?delay_ms=200").with_realtime(true);
    let egress =
        EgressAdapter::open_with_diagnostics(&config, &format(), factory(&stats), diagnostics.clone())
            .unwrap();

    let started = Instant::now();
    for _ in 0..10 {
        assert!(egress.submit(frame()));
    }
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(egress.submitted() + egress.dropped(), 10);
    assert!(egress.dropped() >= 7, "only {} dropped", egress.dropped());
    assert!(diagnostics.tag_count("dropped-frame") >= 1);
}

#[test]
fn stream_destinations_default_to_realtime() {
    let config = EgressConfig::new("udp://127.0.0.1:5004");
    let topology = config.topology(&format()).unwrap();
    assert!(config.is_realtime(&topology));
}

#[test]
fn audio_blocks_travel_with_frames() {
    let stats = EncoderStats::new();
    let egress = open("null://", false, &stats);

    let mut with_audio = frame();
    with_audio.audio = vec![
        MediaSample::audio(
            vec![0u8; 1920 * 8],
            48_000,
            ChannelLayout::Stereo,
            SampleFormat::S32,
            Pts(123),
            MediaDuration(40_000),
        );
        2
    ];
    assert!(egress.submit(with_audio));
    egress.finish().unwrap();
    assert_eq!(stats.video_frames(), 1);
    assert_eq!(stats.audio_blocks(), 2);
}

#[test]
fn encoder_errors_stop_accepting_frames() {
    let stats = EncoderStats::new();
    let egress = open("null://?fail_at=3", false, &stats);

    let deadline = Instant::now() + Duration::from_secs(10);
    while egress.submit(frame()) {
        assert!(Instant::now() < deadline, "egress kept accepting frames");
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(egress.state(), PipelineState::Error);
    assert!(
        egress
            .last_error()
            .is_some_and(|error| error.contains("failed after 3"))
    );
    assert_eq!(stats.video_frames(), 3);
    assert!(!egress.submit(frame()));
    assert!(egress.finish().is_err());
}

#[test]
fn unusable_destinations_fail_construction() {
    let stats = EncoderStats::new();
    for destination in ["", "nosuch://host/out", "null://?delay_ms=soon"] {
        let result = EgressAdapter::open(&EgressConfig::new(destination), &format(), factory(&stats));
        assert!(
            matches!(result, Err(EngineError::InvalidSource { .. })),
            "{destination}"
        );
    }

    let result =
        EgressAdapter::open_with_options("null://", "-bitrate:v lots", &format(), factory(&stats));
    assert!(matches!(result, Err(EngineError::InvalidSource { .. })));
}

#[test]
fn options_reach_the_topology() {
    let stats = EncoderStats::new();
    let egress = EgressAdapter::open_with_options(
        "null://?delay_ms=1",
        "-codec:v vp9 -bitrate:v 900 -realtime 1",
        &format(),
        factory(&stats),
    )
    .unwrap();
    assert!(egress.is_realtime());
    assert_eq!(egress.destination(), "null://?delay_ms=1");
}

#[test]
fn finish_stops_accepting_frames() {
    let stats = EncoderStats::new();
    let egress = open("null://", false, &stats);
    assert!(egress.submit(frame()));
    egress.finish().unwrap();

    assert!(egress.is_finalized());
    assert!(!egress.is_accepting());
    assert!(!egress.submit(frame()));
    assert_eq!(stats.video_frames(), 1);
}

#[test]
fn dropping_finalizes_the_output() {
    let stats = EncoderStats::new();
    let egress = open("null://?delay_ms=10", false, &stats);
    for _ in 0..5 {
        assert!(egress.submit(frame()));
    }

    let started = Instant::now();
    drop(egress);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(stats.eos_received());
    assert!(stats.video_frames() <= 5);
}
