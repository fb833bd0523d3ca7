//! End-to-end session lifecycle scenarios.
//!
//! Every test runs the real controller against simulated capture devices,
//! a scripted link, and a virtual output clock, so the full path from
//! microphone samples to scheduled playback is exercised without hardware
//! or a network backend.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use percept_app::session::{SessionController, SessionOptions, STATS_WINDOW};
use percept_foundation::{AppError, MediaError, SessionState};
use percept_link::{MockConnector, MockLinkConfig, MockShared, ScriptStep, ServerEvent, ServerMessage};
use percept_media::{MediaDevices, SimMediaDevices, VirtualOutput};

struct Harness {
    controller: Arc<SessionController>,
    link: Arc<MockShared>,
    output: Arc<VirtualOutput>,
}

fn test_options() -> SessionOptions {
    SessionOptions {
        api_key: Some("test-key".to_string()),
        connect_timeout: Duration::from_millis(500),
        video_poll_period: Duration::from_millis(50),
        stats_period: Duration::from_millis(10),
        ..SessionOptions::default()
    }
}

fn harness_with(
    link_config: MockLinkConfig,
    devices: SimMediaDevices,
    opts: SessionOptions,
) -> Harness {
    let connector = MockConnector::new(link_config);
    let link = connector.handle();
    let output = Arc::new(VirtualOutput::manual());
    let controller = SessionController::new(
        Arc::new(connector),
        Arc::new(devices) as Arc<dyn MediaDevices>,
        output.clone(),
        opts,
    );
    Harness {
        controller,
        link,
        output,
    }
}

fn harness(link_config: MockLinkConfig) -> Harness {
    harness_with(link_config, SimMediaDevices::tone(), test_options())
}

/// Polls `check` until it holds or the deadline passes.
async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

async fn wait_for_state(harness: &Harness, state: SessionState) {
    let reached = wait_until(Duration::from_secs(2), || {
        harness.controller.state() == state
    })
    .await;
    assert!(
        reached,
        "expected state {state:?}, still {:?}",
        harness.controller.state()
    );
}

#[tokio::test]
async fn connect_refuses_without_credential() {
    let mut opts = test_options();
    opts.api_key = None;
    let harness = harness_with(MockLinkConfig::default(), SimMediaDevices::tone(), opts);

    let err = harness.controller.connect().await.unwrap_err();
    assert!(matches!(err, AppError::MissingCredential));
    assert_eq!(harness.controller.state(), SessionState::Idle);
    assert_eq!(harness.controller.log().count_containing("API Key not found"), 1);
    assert_eq!(harness.link.connect_calls(), 0);
}

#[tokio::test]
async fn happy_path_streams_audio_and_video_uplink() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    let log = harness.controller.log();
    assert_eq!(log.count_containing("Initializing subsystems..."), 1);
    assert_eq!(log.count_containing("Camera stream active"), 1);
    assert_eq!(log.count_containing("Microphone stream active"), 1);
    assert_eq!(log.count_containing("Connected to live network"), 1);

    let link = harness.link.clone();
    let streamed = wait_until(Duration::from_secs(2), || {
        link.sent_count_with_mime("audio/pcm") > 0 && link.sent_count_with_mime("image/") > 0
    })
    .await;
    assert!(
        streamed,
        "uplink never streamed: {} audio, {} image",
        harness.link.sent_count_with_mime("audio/pcm"),
        harness.link.sent_count_with_mime("image/")
    );

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn response_chunks_schedule_back_to_back() {
    // 240 samples at 24 kHz is a 10 ms chunk.
    let harness = harness(MockLinkConfig {
        script: vec![
            ScriptStep::Open,
            ScriptStep::audio_chunk(&[0.3; 240]),
            ScriptStep::audio_chunk(&[0.3; 240]),
        ],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    let probe = harness.output.probe().expect("virtual sink opened");
    let scheduled = wait_until(Duration::from_secs(2), || probe.schedules().len() == 2).await;
    assert!(scheduled, "expected 2 scheduled units");

    let schedules = probe.schedules();
    assert_eq!(schedules[0].start, 0.0);
    let expected = schedules[0].start + schedules[0].duration;
    assert!(
        (schedules[1].start - expected).abs() < 1e-9,
        "second chunk starts at {}, expected {expected}",
        schedules[1].start
    );
    assert!(harness.controller.metrics().speaking());

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn barge_in_stops_playback_and_resets_the_timeline() {
    // Two long chunks, then the user talks over them, then a fresh turn.
    let harness = harness(MockLinkConfig {
        script: vec![
            ScriptStep::Open,
            ScriptStep::audio_chunk(&[0.3; 2_400]),
            ScriptStep::audio_chunk(&[0.3; 2_400]),
            ScriptStep::Wait { millis: 100 },
            ScriptStep::interrupt(),
            ScriptStep::Wait { millis: 50 },
            ScriptStep::audio_chunk(&[0.3; 2_400]),
        ],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    let probe = harness.output.probe().expect("virtual sink opened");
    let interrupted = wait_until(Duration::from_secs(2), || probe.stops().len() == 2).await;
    assert!(interrupted, "both live units should be stopped");

    let metrics = harness.controller.metrics();
    assert_eq!(metrics.interruptions.load(Ordering::Relaxed), 1);
    assert_eq!(
        harness.controller.log().count_containing("Interrupted by user"),
        1
    );

    // The next turn schedules from a reset clock.
    let resumed = wait_until(Duration::from_secs(2), || probe.schedules().len() == 3).await;
    assert!(resumed, "post-interrupt chunk never scheduled");
    assert_eq!(probe.schedules()[2].start, 0.0);

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn speaking_clears_when_playback_runs_out() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open, ScriptStep::audio_chunk(&[0.3; 240])],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    let metrics = harness.controller.metrics().clone();
    let speaking = wait_until(Duration::from_secs(2), || metrics.speaking()).await;
    assert!(speaking, "chunk never started speaking");

    // Push the playback clock past the 10 ms chunk.
    let probe = harness.output.probe().expect("virtual sink opened");
    probe.advance(0.02);

    let quiet = wait_until(Duration::from_secs(2), || !metrics.speaking()).await;
    assert!(quiet, "speaking flag never cleared");
    assert_eq!(metrics.playback_units_active.load(Ordering::Relaxed), 0);

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn connect_failure_lands_in_error_state() {
    let harness = harness(MockLinkConfig {
        fail_connect: Some("quota exceeded".to_string()),
        ..Default::default()
    });

    // Devices open fine; the failure arrives from the link afterwards.
    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Error).await;

    let log = harness.controller.log();
    assert_eq!(log.count_containing("Initialization failed"), 1);
    assert_eq!(log.count_containing("quota exceeded"), 1);
    assert_eq!(harness.link.connect_calls(), 1);
}

#[tokio::test]
async fn missing_microphone_fails_connect_synchronously() {
    let harness = harness_with(
        MockLinkConfig::default(),
        SimMediaDevices::no_microphone(),
        test_options(),
    );

    let err = harness.controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Media(MediaError::DeviceUnavailable { .. })
    ));
    assert_eq!(harness.controller.state(), SessionState::Error);
    assert_eq!(
        harness.controller.log().count_containing("Initialization failed"),
        1
    );
    assert_eq!(harness.link.connect_calls(), 0);
}

#[tokio::test]
async fn silent_handshake_times_out() {
    // The session connects but never sends Opened.
    let mut opts = test_options();
    opts.connect_timeout = Duration::from_millis(200);
    let harness = harness_with(MockLinkConfig::default(), SimMediaDevices::tone(), opts);

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Error).await;

    assert_eq!(
        harness
            .controller
            .log()
            .count_containing("No response from live service within 200 ms"),
        1
    );
    // Teardown closes the session that did resolve.
    assert_eq!(harness.link.close_calls(), 1);
}

#[tokio::test]
async fn remote_close_returns_to_idle() {
    let harness = harness(MockLinkConfig {
        script: vec![
            ScriptStep::Open,
            ScriptStep::Wait { millis: 200 },
            ScriptStep::Close {
                reason: "server done".to_string(),
            },
        ],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;
    wait_for_state(&harness, SessionState::Idle).await;

    assert_eq!(harness.controller.log().count_containing("Session closed"), 1);
    assert_eq!(harness.link.close_calls(), 1);
}

#[tokio::test]
async fn transport_error_is_logged_without_dropping_the_session() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    assert!(
        harness
            .link
            .send_event(ServerEvent::Error {
                message: "flaky".to_string()
            })
            .await
    );

    let log = harness.controller.log().clone();
    let logged = wait_until(Duration::from_secs(2), || {
        log.count_containing("Session error: flaky") == 1
    })
    .await;
    assert!(logged, "transport error never reached the log");
    assert_eq!(harness.controller.state(), SessionState::Running);

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn undecodable_response_audio_is_counted_and_skipped() {
    let harness = harness(MockLinkConfig {
        script: vec![
            ScriptStep::Open,
            ScriptStep::Message(ServerMessage::audio(
                "!!!not-base64!!!",
                "audio/pcm;rate=24000",
            )),
        ],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    let metrics = harness.controller.metrics().clone();
    let counted = wait_until(Duration::from_secs(2), || {
        metrics.decode_errors.load(Ordering::Relaxed) == 1
    })
    .await;
    assert!(counted, "decode error never counted");
    assert_eq!(
        harness.controller.log().count_containing("Audio decode failed"),
        1
    );
    assert_eq!(harness.controller.state(), SessionState::Running);

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn disconnect_shuts_down_once_and_is_then_silent() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    harness.controller.disconnect().await;
    assert_eq!(harness.controller.state(), SessionState::Idle);
    assert_eq!(harness.controller.log().count_containing("System shut down"), 1);
    assert_eq!(harness.link.close_calls(), 1);

    // Nothing left to stop: no extra log line, no extra close.
    harness.controller.disconnect().await;
    assert_eq!(harness.controller.log().count_containing("System shut down"), 1);
    assert_eq!(harness.link.close_calls(), 1);
}

#[tokio::test]
async fn connect_while_running_is_ignored() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    harness.controller.connect().await.unwrap();
    assert_eq!(harness.link.connect_calls(), 1);
    assert_eq!(
        harness
            .controller
            .log()
            .count_containing("Initializing subsystems..."),
        1
    );

    harness.controller.disconnect().await;
}

#[tokio::test]
async fn stats_sampling_keeps_a_bounded_window() {
    let harness = harness(MockLinkConfig {
        script: vec![ScriptStep::Open],
        ..Default::default()
    });

    harness.controller.connect().await.unwrap();
    wait_for_state(&harness, SessionState::Running).await;

    // 10 ms period: well over a full window, which must stay capped.
    let controller = harness.controller.clone();
    let filled = wait_until(Duration::from_secs(2), || {
        controller.stats_window().len() == STATS_WINDOW
    })
    .await;
    assert!(filled, "stats window never filled");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let window = harness.controller.stats_window();
    assert_eq!(window.len(), STATS_WINDOW);
    for sample in &window {
        assert!(
            (20.0..70.0).contains(&sample.cpu_usage),
            "cpu sample out of band: {}",
            sample.cpu_usage
        );
        assert!(sample.confidence > 0.0 && sample.confidence <= 1.0);
    }

    harness.controller.disconnect().await;
    // Teardown clears the dashboard window along with the counters.
    assert!(harness.controller.stats_window().is_empty());
}
