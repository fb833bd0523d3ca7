use std::sync::Arc;

use async_trait::async_trait;
use percept_foundation::LinkError;
use tokio::sync::mpsc;

use crate::types::{RealtimeInput, ServerEvent};

/// Default model the live session is opened against.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default persona sent as the session system instruction.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = concat!(
    "You are \"Vision AI\", an advanced interactive perception system running on embedded hardware. \n",
    "Your goal is to act as the eyes and ears for the user. \n",
    "You are concise, technical, and helpful. \n",
    "You analyze the video feed to detect objects, read text, and describe the environment. \n",
    "You answer voice queries about what you see.\n",
    "Keep responses relatively short and conversational, suitable for a voice interface.",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Audio,
}

/// Everything needed to open a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            response_modality: ResponseModality::Audio,
        }
    }
}

/// An open session that accepts media frames.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send(&self, input: RealtimeInput) -> Result<(), LinkError>;

    /// Tells the remote side we are done. Safe to call more than once.
    async fn close(&self) -> Result<(), LinkError>;
}

impl std::fmt::Debug for dyn LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn LiveSession")
    }
}

/// Opens live sessions against some backend.
///
/// Events for the session's whole lifetime (open, messages, errors, close)
/// arrive on the channel handed to [`connect`](LiveConnector::connect), in
/// the order the backend produced them.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(
        &self,
        config: SessionConfig,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Arc<dyn LiveSession>, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_native_audio_model() {
        let config = SessionConfig::default();
        assert_eq!(config.model, "gemini-2.5-flash-native-audio-preview-09-2025");
        assert_eq!(config.response_modality, ResponseModality::Audio);
        assert!(config.system_instruction.starts_with("You are \"Vision AI\""));
        assert!(config
            .system_instruction
            .ends_with("suitable for a voice interface."));
    }
}
