use std::sync::atomic::Ordering;
use std::time::Duration;

use percept_codec::MediaFrame;
use percept_telemetry::{EventLog, PipelineMetrics, Subsystem};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default capture cadence for video stills.
pub const VIDEO_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Produces compressed stills on demand.
///
/// Implementations own the camera (or synthetic pattern) and do their own
/// scaling and JPEG compression; the poller only schedules them.
pub trait VideoSource: Send {
    /// Captures one still, or `None` when no frame is ready yet.
    fn poll_frame(&mut self) -> Option<Vec<u8>>;
}

/// Captures a still once per period and queues it for the uplink.
///
/// The first capture lands one full period after start, not immediately,
/// so a session that opens quickly still gets mic audio first.
pub struct VideoPoller {
    source: Box<dyn VideoSource>,
    frame_tx: mpsc::Sender<MediaFrame>,
    period: Duration,
    log: EventLog,
    metrics: PipelineMetrics,
}

impl VideoPoller {
    pub fn new(
        source: Box<dyn VideoSource>,
        frame_tx: mpsc::Sender<MediaFrame>,
        period: Duration,
        log: EventLog,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            source,
            frame_tx,
            period,
            log,
            metrics,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Video poller started at {:?} cadence", self.period);
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // An interval fires immediately; swallow that tick so the first
        // still goes out a full period after start.
        ticker.tick().await;

        let mut dropped: u64 = 0;
        loop {
            ticker.tick().await;
            let Some(jpeg) = self.source.poll_frame() else {
                debug!("Video source not ready, skipping tick");
                continue;
            };
            self.metrics
                .video_frames_captured
                .fetch_add(1, Ordering::Relaxed);

            match self.frame_tx.try_send(MediaFrame::image_jpeg(&jpeg)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!("Frame queue full, dropped video still ({} total)", dropped);
                    if dropped == 1 {
                        self.log
                            .warn(Subsystem::Video, "Uplink congested, dropping video frames");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!("Frame queue closed, video poller exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::collections::VecDeque;
    use std::time::Instant;

    struct ScriptedSource {
        polls: VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Option<Vec<u8>>>) -> Box<Self> {
            Box::new(Self {
                polls: polls.into(),
            })
        }
    }

    impl VideoSource for ScriptedSource {
        fn poll_frame(&mut self) -> Option<Vec<u8>> {
            self.polls.pop_front().flatten()
        }
    }

    #[tokio::test]
    async fn first_still_arrives_one_period_after_start() {
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let source = ScriptedSource::new(vec![Some(vec![1u8]); 4]);
        let started = Instant::now();
        let handle = VideoPoller::new(
            source,
            frame_tx,
            Duration::from_millis(50),
            EventLog::new(),
            PipelineMetrics::default(),
        )
        .spawn();

        assert!(frame_rx.try_recv().is_err());
        let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
            .await
            .expect("still within deadline")
            .expect("channel open");
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert_eq!(frame.mime_type, "image/jpeg");
        handle.abort();
    }

    #[tokio::test]
    async fn stills_preserve_payload_and_order() {
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let source = ScriptedSource::new(vec![Some(vec![0xAA, 1]), Some(vec![0xAA, 2])]);
        let metrics = PipelineMetrics::default();
        let handle = VideoPoller::new(
            source,
            frame_tx,
            Duration::from_millis(20),
            EventLog::new(),
            metrics.clone(),
        )
        .spawn();

        for expected in 1u8..=2 {
            let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
                .await
                .expect("still within deadline")
                .expect("channel open");
            assert_eq!(
                STANDARD.decode(&frame.data).unwrap(),
                vec![0xAA, expected]
            );
        }
        assert_eq!(metrics.video_frames_captured.load(Ordering::Relaxed), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn not_ready_polls_are_skipped() {
        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let source = ScriptedSource::new(vec![None, None, Some(vec![7u8])]);
        let metrics = PipelineMetrics::default();
        let handle = VideoPoller::new(
            source,
            frame_tx,
            Duration::from_millis(20),
            EventLog::new(),
            metrics.clone(),
        )
        .spawn();

        let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
            .await
            .expect("still within deadline")
            .expect("channel open");
        assert_eq!(STANDARD.decode(&frame.data).unwrap(), vec![7u8]);
        assert_eq!(metrics.video_frames_captured.load(Ordering::Relaxed), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn closed_queue_stops_the_poller() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let source = ScriptedSource::new(vec![Some(vec![1u8]); 8]);
        let handle = VideoPoller::new(
            source,
            frame_tx,
            Duration::from_millis(10),
            EventLog::new(),
            PipelineMetrics::default(),
        )
        .spawn();

        drop(frame_rx);
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller exits once the queue is gone")
            .unwrap();
    }
}
