use std::sync::atomic::Ordering;
use std::sync::Arc;

use percept_codec::{MediaFrame, MediaKind};
use percept_foundation::LinkError;
use percept_telemetry::{EventLog, PipelineMetrics, Subsystem};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::LiveSession;
use crate::types::RealtimeInput;

/// Capacity of the frame queue between capture workers and the gate.
///
/// Audio arrives every 256 ms and video once a second, so this buffers
/// well over ten seconds of a slow session handshake before producers
/// start dropping.
pub const FRAME_QUEUE_CAPACITY: usize = 64;

/// Holds captured frames until the session opens, then forwards them.
///
/// Capture workers start producing the moment devices open, before the
/// session handshake finishes. Frames queue in arrival order and drain
/// in that same order once the session resolves. If the handshake fails
/// the buffered frames are dropped and counted.
pub struct TransmitGate {
    frame_rx: mpsc::Receiver<MediaFrame>,
    session_rx: oneshot::Receiver<Result<Arc<dyn LiveSession>, LinkError>>,
    log: EventLog,
    metrics: PipelineMetrics,
}

impl TransmitGate {
    pub fn new(
        frame_rx: mpsc::Receiver<MediaFrame>,
        session_rx: oneshot::Receiver<Result<Arc<dyn LiveSession>, LinkError>>,
        log: EventLog,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            frame_rx,
            session_rx,
            log,
            metrics,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let Self {
            mut frame_rx,
            session_rx,
            log,
            metrics,
        } = self;

        let session = match session_rx.await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                abandon_buffered(&mut frame_rx, &log, &metrics, &err.to_string());
                return;
            }
            Err(_) => {
                abandon_buffered(&mut frame_rx, &log, &metrics, "session task dropped");
                return;
            }
        };

        debug!("Uplink open, forwarding frames");
        let mut send_failure_logged = false;
        while let Some(frame) = frame_rx.recv().await {
            let kind = frame.kind;
            match session.send(RealtimeInput::from(frame)).await {
                Ok(()) => {
                    let counter = match kind {
                        MediaKind::Audio => &metrics.audio_frames_sent,
                        MediaKind::Image => &metrics.video_frames_sent,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(kind = ?kind, "Frame send failed: {}", err);
                    if !send_failure_logged {
                        send_failure_logged = true;
                        log.warn(Subsystem::Core, format!("Frame send failed: {err}"));
                    }
                }
            }
        }
        debug!("Frame queue closed, uplink gate exiting");
    }
}

/// Drains and counts frames that will never reach the session.
fn abandon_buffered(
    frame_rx: &mut mpsc::Receiver<MediaFrame>,
    log: &EventLog,
    metrics: &PipelineMetrics,
    reason: &str,
) {
    frame_rx.close();
    let mut dropped = 0u64;
    while frame_rx.try_recv().is_ok() {
        dropped += 1;
    }
    metrics.frames_abandoned.fetch_add(dropped, Ordering::Relaxed);
    if dropped > 0 {
        log.error(
            Subsystem::Core,
            format!("Uplink unavailable, dropped {dropped} buffered frame(s): {reason}"),
        );
    } else {
        debug!("Uplink unavailable before any frames buffered: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSession {
        sent: Mutex<Vec<RealtimeInput>>,
        fail_after: Option<usize>,
        attempts: AtomicUsize,
    }

    impl RecordingSession {
        fn new(fail_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_after,
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LiveSession for RecordingSession {
        async fn send(&self, input: RealtimeInput) -> Result<(), LinkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after {
                if attempt >= limit {
                    return Err(LinkError::SendFailed("socket gone".to_string()));
                }
            }
            self.sent.lock().push(input);
            Ok(())
        }

        async fn close(&self) -> Result<(), LinkError> {
            Ok(())
        }
    }

    fn audio_frame(tag: u8) -> MediaFrame {
        MediaFrame::audio(&[tag as f32 / 256.0; 8], 16_000)
    }

    #[tokio::test]
    async fn frames_queued_before_open_drain_in_order() {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (session_tx, session_rx) = oneshot::channel();
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();
        let handle =
            TransmitGate::new(frame_rx, session_rx, log.clone(), metrics.clone()).spawn();

        frame_tx.send(audio_frame(1)).await.unwrap();
        frame_tx.send(MediaFrame::image_jpeg(&[0xFF, 0xD8])).await.unwrap();
        frame_tx.send(audio_frame(2)).await.unwrap();

        let session = RecordingSession::new(None);
        session_tx
            .send(Ok(session.clone() as Arc<dyn LiveSession>))
            .unwrap_or_else(|_| panic!("gate dropped session receiver"));
        drop(frame_tx);
        handle.await.unwrap();

        let sent = session.sent.lock();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].media.mime_type, "audio/pcm;rate=16000");
        assert_eq!(sent[1].media.mime_type, "image/jpeg");
        assert_eq!(sent[2].media.mime_type, "audio/pcm;rate=16000");
        assert_eq!(metrics.audio_frames_sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.video_frames_sent.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.send_failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn failed_connect_abandons_buffered_frames() {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (session_tx, session_rx) = oneshot::channel();
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();
        let handle =
            TransmitGate::new(frame_rx, session_rx, log.clone(), metrics.clone()).spawn();

        frame_tx.send(audio_frame(1)).await.unwrap();
        frame_tx.send(audio_frame(2)).await.unwrap();
        session_tx
            .send(Err(LinkError::ConnectFailed("no route".to_string())))
            .unwrap_or_else(|_| panic!("gate dropped session receiver"));
        handle.await.unwrap();

        assert_eq!(metrics.frames_abandoned.load(Ordering::Relaxed), 2);
        assert_eq!(log.count_containing("dropped 2 buffered frame(s)"), 1);
        assert!(frame_tx.send(audio_frame(3)).await.is_err());
    }

    #[tokio::test]
    async fn dropped_session_task_abandons_quietly_when_empty() {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (session_tx, session_rx) = oneshot::channel::<Result<Arc<dyn LiveSession>, LinkError>>();
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();
        let handle =
            TransmitGate::new(frame_rx, session_rx, log.clone(), metrics.clone()).spawn();

        drop(session_tx);
        handle.await.unwrap();

        assert_eq!(metrics.frames_abandoned.load(Ordering::Relaxed), 0);
        assert!(log.is_empty());
        drop(frame_tx);
    }

    #[tokio::test]
    async fn send_failures_are_counted_and_logged_once() {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (session_tx, session_rx) = oneshot::channel();
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();
        let handle =
            TransmitGate::new(frame_rx, session_rx, log.clone(), metrics.clone()).spawn();

        let session = RecordingSession::new(Some(1));
        session_tx
            .send(Ok(session.clone() as Arc<dyn LiveSession>))
            .unwrap_or_else(|_| panic!("gate dropped session receiver"));

        frame_tx.send(audio_frame(1)).await.unwrap();
        frame_tx.send(audio_frame(2)).await.unwrap();
        frame_tx.send(audio_frame(3)).await.unwrap();
        drop(frame_tx);
        handle.await.unwrap();

        assert_eq!(session.sent.lock().len(), 1);
        assert_eq!(metrics.audio_frames_sent.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.send_failures.load(Ordering::Relaxed), 2);
        assert_eq!(log.count_containing("Frame send failed"), 1);
    }
}
