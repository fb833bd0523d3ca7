//! PCM16 wire codec and media frame model.
//!
//! The remote session consumes 16-bit little-endian PCM wrapped in base64
//! and returns audio in the same encoding at a higher sample rate. This
//! crate owns that conversion plus the [`MediaFrame`] type that capture
//! workers hand to the uplink.

pub mod frame;
pub mod pcm;

pub use frame::*;
pub use pcm::*;

/// Sample rate for microphone audio sent upstream, in Hz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio the remote session produces, in Hz.
pub const RESPONSE_SAMPLE_RATE: u32 = 24_000;

/// Samples per uplink audio frame at [`CAPTURE_SAMPLE_RATE`] (256 ms).
pub const FRAME_SAMPLES: usize = 4096;
