//! In-process echo backend for `--simulate` runs and demos.
//!
//! Microphone audio sent uplink comes back as a model turn about once a
//! second, resampled to the response rate. Image frames are accepted and
//! counted but produce no response. The whole wire cycle (encode, gate,
//! decode, gapless scheduling) runs exactly as it would against a live
//! service, just without a network.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use percept_codec::{decode_frame, encode_frame, CAPTURE_SAMPLE_RATE, RESPONSE_SAMPLE_RATE};
use percept_foundation::LinkError;
use percept_link::{LiveConnector, LiveSession, RealtimeInput, ServerEvent, ServerMessage, SessionConfig};
use percept_media::StreamResampler;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct EchoConnector {
    open_delay: Duration,
    flush_period: Duration,
}

impl Default for EchoConnector {
    fn default() -> Self {
        Self {
            open_delay: Duration::from_millis(200),
            flush_period: Duration::from_secs(1),
        }
    }
}

impl EchoConnector {
    pub fn new(open_delay: Duration, flush_period: Duration) -> Self {
        Self {
            open_delay,
            flush_period,
        }
    }
}

struct EchoShared {
    /// Decoded capture-rate samples awaiting the next flush.
    pending: Mutex<Vec<f32>>,
    images_received: AtomicU64,
    closed: AtomicBool,
}

#[async_trait]
impl LiveConnector for EchoConnector {
    fn name(&self) -> &str {
        "echo"
    }

    async fn connect(
        &self,
        _config: SessionConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Arc<dyn LiveSession>, LinkError> {
        let shared = Arc::new(EchoShared {
            pending: Mutex::new(Vec::new()),
            images_received: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let open_delay = self.open_delay;
        let flush_period = self.flush_period;
        let flusher_shared = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(open_delay).await;
            if events.send(ServerEvent::Opened).await.is_err() {
                return;
            }
            info!("Echo backend session open");

            loop {
                tokio::time::sleep(flush_period).await;
                if flusher_shared.closed.load(Ordering::Relaxed) {
                    let _ = events
                        .send(ServerEvent::Closed {
                            reason: "client closed".to_string(),
                        })
                        .await;
                    return;
                }

                let samples = std::mem::take(&mut *flusher_shared.pending.lock());
                if samples.is_empty() {
                    continue;
                }

                let mut resampler = StreamResampler::new(CAPTURE_SAMPLE_RATE, RESPONSE_SAMPLE_RATE);
                let response = resampler.process(&samples);
                let encoded = encode_frame(&response, RESPONSE_SAMPLE_RATE);
                debug!(samples = response.len(), "Echoing one turn of audio");
                if events
                    .send(ServerEvent::Message(ServerMessage::audio(
                        encoded.data,
                        encoded.mime_type,
                    )))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });

        Ok(Arc::new(EchoSession { shared }))
    }
}

struct EchoSession {
    shared: Arc<EchoShared>,
}

#[async_trait]
impl LiveSession for EchoSession {
    async fn send(&self, input: RealtimeInput) -> Result<(), LinkError> {
        let mime = input.media.mime_type.as_str();
        if mime.starts_with("audio/pcm") {
            let buffer = decode_frame(&input.media.data, CAPTURE_SAMPLE_RATE)
                .map_err(|err| LinkError::SendFailed(format!("bad audio payload: {err}")))?;
            self.shared.pending.lock().extend_from_slice(&buffer.samples);
        } else if mime.starts_with("image/") {
            self.shared.images_received.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!(%mime, "Echo backend ignoring frame of unknown type");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.shared.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
