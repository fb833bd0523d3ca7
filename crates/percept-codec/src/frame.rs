use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::pcm::encode_frame;

/// MIME type for captured video stills.
pub const MIME_JPEG: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
}

/// One captured media payload, already encoded for the wire.
///
/// Audio and video workers both produce these; the uplink forwards them
/// in arrival order without caring which kind they are.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaKind,
    pub mime_type: String,
    /// Base64 payload (PCM16 for audio, JPEG bytes for stills).
    pub data: String,
    pub captured_at: Instant,
}

impl MediaFrame {
    /// Encodes a frame of float samples as a PCM16 audio frame.
    pub fn audio(samples: &[f32], sample_rate: u32) -> Self {
        let encoded = encode_frame(samples, sample_rate);
        Self {
            kind: MediaKind::Audio,
            mime_type: encoded.mime_type,
            data: encoded.data,
            captured_at: Instant::now(),
        }
    }

    /// Wraps an already-compressed JPEG still.
    pub fn image_jpeg(jpeg: &[u8]) -> Self {
        Self {
            kind: MediaKind::Image,
            mime_type: MIME_JPEG.to_string(),
            data: STANDARD.encode(jpeg),
            captured_at: Instant::now(),
        }
    }
}
