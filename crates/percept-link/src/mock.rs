//! Scriptable in-process connector for exercising the pipeline without a
//! network backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use percept_codec::{encode_frame, RESPONSE_SAMPLE_RATE};
use percept_foundation::LinkError;
use tokio::sync::mpsc;

use crate::session::{LiveConnector, LiveSession, SessionConfig};
use crate::types::{RealtimeInput, ServerEvent, ServerMessage};

/// One beat of a scripted session, played in order after connect.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver the handshake-complete event.
    Open,
    /// Deliver a downlink message.
    Message(ServerMessage),
    /// Deliver a transport error event.
    ErrorEvent { message: String },
    /// Deliver a remote close.
    Close { reason: String },
    /// Pause the script.
    Wait { millis: u64 },
}

impl ScriptStep {
    /// A model turn carrying the given samples as PCM16 at the response rate.
    pub fn audio_chunk(samples: &[f32]) -> Self {
        let encoded = encode_frame(samples, RESPONSE_SAMPLE_RATE);
        ScriptStep::Message(ServerMessage::audio(encoded.data, encoded.mime_type))
    }

    /// A barge-in notification.
    pub fn interrupt() -> Self {
        ScriptStep::Message(ServerMessage::interrupted())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockLinkConfig {
    /// Events to play once connected. An empty script opens a session
    /// that stays silent, which is how handshake timeouts are exercised.
    pub script: Vec<ScriptStep>,
    /// Fail `connect` itself with this reason instead of opening.
    pub fail_connect: Option<String>,
    /// Delay before `connect` resolves either way.
    pub connect_delay_ms: u64,
    /// After this many successful sends, every further send fails.
    pub fail_sends_after: Option<usize>,
}

/// Observable state shared between a [`MockConnector`] and its tests.
#[derive(Default)]
pub struct MockShared {
    pub sent: Mutex<Vec<RealtimeInput>>,
    pub send_attempts: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    events: Mutex<Option<mpsc::Sender<ServerEvent>>>,
}

impl MockShared {
    pub fn sent_snapshot(&self) -> Vec<RealtimeInput> {
        self.sent.lock().clone()
    }

    pub fn sent_count_with_mime(&self, prefix: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|input| input.media.mime_type.starts_with(prefix))
            .count()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Injects an event outside the script, as a live backend could at any
    /// time. Returns false once the session side has gone away.
    pub async fn send_event(&self, event: ServerEvent) -> bool {
        let sender = self.events.lock().clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

/// [`LiveConnector`] that plays a [`MockLinkConfig`] script.
#[derive(Clone)]
pub struct MockConnector {
    config: MockLinkConfig,
    shared: Arc<MockShared>,
}

impl MockConnector {
    pub fn new(config: MockLinkConfig) -> Self {
        Self {
            config,
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Handle for inspecting what the pipeline did to this connector.
    pub fn handle(&self) -> Arc<MockShared> {
        self.shared.clone()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        _config: SessionConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Arc<dyn LiveSession>, LinkError> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.config.connect_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.connect_delay_ms)).await;
        }
        if let Some(reason) = &self.config.fail_connect {
            return Err(LinkError::ConnectFailed(reason.clone()));
        }

        *self.shared.events.lock() = Some(events.clone());
        let script = self.config.script.clone();
        tokio::spawn(async move {
            for step in script {
                let delivered = match step {
                    ScriptStep::Open => events.send(ServerEvent::Opened).await.is_ok(),
                    ScriptStep::Message(message) => {
                        events.send(ServerEvent::Message(message)).await.is_ok()
                    }
                    ScriptStep::ErrorEvent { message } => {
                        events.send(ServerEvent::Error { message }).await.is_ok()
                    }
                    ScriptStep::Close { reason } => {
                        events.send(ServerEvent::Closed { reason }).await.is_ok()
                    }
                    ScriptStep::Wait { millis } => {
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        true
                    }
                };
                if !delivered {
                    break;
                }
            }
        });

        Ok(Arc::new(MockSession {
            shared: self.shared.clone(),
            fail_sends_after: self.config.fail_sends_after,
        }))
    }
}

struct MockSession {
    shared: Arc<MockShared>,
    fail_sends_after: Option<usize>,
}

#[async_trait]
impl LiveSession for MockSession {
    async fn send(&self, input: RealtimeInput) -> Result<(), LinkError> {
        let attempt = self.shared.send_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_sends_after {
            if attempt >= limit {
                return Err(LinkError::SendFailed("mock transport refused".to_string()));
            }
        }
        self.shared.sent.lock().push(input);
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
