use percept_codec::MediaFrame;
use serde::{Deserialize, Serialize};

/// One base64 payload plus its MIME type, as the service frames media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

/// Uplink envelope for one captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

impl From<MediaFrame> for RealtimeInput {
    fn from(frame: MediaFrame) -> Self {
        Self {
            media: MediaBlob {
                mime_type: frame.mime_type,
                data: frame.data,
            },
        }
    }
}

/// Downlink message from the live session.
///
/// Unknown fields are ignored; everything the pipeline reads is optional
/// because the service mixes content, control, and transcription messages
/// on one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

impl ServerMessage {
    /// Base64 PCM16 from the first part of a model turn, if any.
    pub fn audio_chunk(&self) -> Option<&str> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
            .map(|blob| blob.data.as_str())
    }

    /// True when the service reports the user talked over the model.
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|content| content.interrupted)
            .unwrap_or(false)
    }

    /// Builds a model-turn message carrying one audio part.
    pub fn audio(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        inline_data: Some(MediaBlob {
                            mime_type: mime_type.into(),
                            data: data.into(),
                        }),
                    }],
                }),
                interrupted: None,
            }),
        }
    }

    /// Builds a barge-in notification.
    pub fn interrupted() -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: None,
                interrupted: Some(true),
            }),
        }
    }
}

/// Session callbacks flattened into one ordered stream.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The session finished its handshake and accepts input.
    Opened,
    Message(ServerMessage),
    /// Transport-level fault. The session may still be alive.
    Error { message: String },
    /// The remote side closed the session.
    Closed { reason: String },
}
