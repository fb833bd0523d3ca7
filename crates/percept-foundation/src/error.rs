use crate::state::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("API key not found")]
    MissingCredential,

    #[error("Media subsystem error: {0}")]
    Media(#[from] MediaError),

    #[error("Live link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Audio output unavailable: {reason}")]
    PlaybackUnavailable { reason: String },

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Fatal media error: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("No response from live service within {timeout_ms} ms")]
    OpenTimeout { timeout_ms: u64 },
}

impl AppError {
    /// Connect-sequence failures escalate to the ERROR state; everything else
    /// is absorbed with a log entry and the session keeps running.
    pub fn is_connect_fatal(&self) -> bool {
        matches!(
            self,
            AppError::MissingCredential
                | AppError::Media(_)
                | AppError::Link(LinkError::ConnectFailed(_))
                | AppError::Link(LinkError::OpenTimeout { .. })
        )
    }
}
