use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Failures while decoding a PCM16 payload from the wire.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd byte length {len}")]
    MalformedPayload { len: usize },
}

/// A base64 PCM16 payload ready to send upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Base64 of little-endian 16-bit samples.
    pub data: String,
    /// `audio/pcm;rate=<hz>` for the rate the samples were captured at.
    pub mime_type: String,
}

/// Decoded audio returned by the remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Quantizes float samples to 16-bit PCM and base64-encodes them.
///
/// Negative samples scale by 32768 and non-negative by 32767 so that the
/// full [-1.0, 1.0] range maps onto [-32768, 32767] without overflow.
/// Conversion truncates toward zero. Out-of-range input is clamped.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedAudio {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let sample = sample.clamp(-1.0, 1.0);
        let scaled = if sample < 0.0 {
            sample * 32_768.0
        } else {
            sample * 32_767.0
        };
        bytes.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    EncodedAudio {
        data: STANDARD.encode(&bytes),
        mime_type: format!("audio/pcm;rate={sample_rate}"),
    }
}

/// Decodes a base64 PCM16 payload into float samples.
///
/// Every sample divides by 32768 regardless of sign, mirroring the scale
/// the remote side expects on its own decode path.
pub fn decode_frame(data: &str, sample_rate: u32) -> Result<AudioBuffer, CodecError> {
    let bytes = STANDARD.decode(data)?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::MalformedPayload { len: bytes.len() });
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
        .collect();
    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_bytes(encoded: &EncodedAudio) -> Vec<u8> {
        STANDARD.decode(&encoded.data).unwrap()
    }

    fn as_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn full_scale_maps_to_i16_extremes() {
        let encoded = encode_frame(&[-1.0, 1.0, 0.0], 16_000);
        assert_eq!(as_i16(&raw_bytes(&encoded)), vec![-32768, 32767, 0]);
    }

    #[test]
    fn scaling_is_asymmetric_around_zero() {
        let encoded = encode_frame(&[0.5, -0.5], 16_000);
        // 0.5 * 32767 truncates to 16383; -0.5 * 32768 is exactly -16384.
        assert_eq!(as_i16(&raw_bytes(&encoded)), vec![16383, -16384]);
    }

    #[test]
    fn samples_are_little_endian() {
        let encoded = encode_frame(&[-0.5], 16_000);
        assert_eq!(raw_bytes(&encoded), vec![0x00, 0xC0]);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        let encoded = encode_frame(&[2.0, -2.0, f32::INFINITY, f32::NEG_INFINITY], 16_000);
        assert_eq!(
            as_i16(&raw_bytes(&encoded)),
            vec![32767, -32768, 32767, -32768]
        );
    }

    #[test]
    fn mime_type_carries_sample_rate() {
        assert_eq!(encode_frame(&[], 16_000).mime_type, "audio/pcm;rate=16000");
        assert_eq!(encode_frame(&[], 24_000).mime_type, "audio/pcm;rate=24000");
    }

    #[test]
    fn decode_divides_by_32768() {
        let bytes: Vec<u8> = [-32768i16, 32767, 0, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = decode_frame(&STANDARD.encode(&bytes), 24_000).unwrap();
        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(
            buffer.samples,
            vec![-1.0, 32_767.0 / 32_768.0, 0.0, -0.5]
        );
    }

    #[test]
    fn decode_rejects_odd_byte_length() {
        let payload = STANDARD.encode([0u8, 1, 2]);
        let err = decode_frame(&payload, 24_000).unwrap_err();
        assert!(matches!(err, CodecError::MalformedPayload { len: 3 }));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = decode_frame("not base64!!!", 24_000).unwrap_err();
        assert!(matches!(err, CodecError::InvalidBase64(_)));
    }

    #[test]
    fn empty_payload_decodes_to_empty_buffer() {
        let buffer = decode_frame("", 24_000).unwrap();
        assert!(buffer.samples.is_empty());
        assert_eq!(buffer.duration_secs(), 0.0);
    }

    #[test]
    fn duration_reflects_sample_rate() {
        let buffer = AudioBuffer {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);

        let buffer = AudioBuffer {
            samples: vec![0.0; 8_000],
            sample_rate: 16_000,
        };
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn round_trip_stays_within_one_quantization_step(
            samples in prop::collection::vec(-1.0f32..=1.0, 0..512)
        ) {
            let encoded = encode_frame(&samples, 16_000);
            let decoded = decode_frame(&encoded.data, 16_000).unwrap();
            prop_assert_eq!(decoded.samples.len(), samples.len());
            // Positive samples pass through two different scale factors,
            // so allow up to two steps of error.
            let tolerance = 2.0 / 32_768.0 + 1e-6;
            for (original, round_tripped) in samples.iter().zip(&decoded.samples) {
                prop_assert!((original - round_tripped).abs() <= tolerance);
                prop_assert!((-1.0..=1.0).contains(round_tripped));
            }
        }

        #[test]
        fn arbitrary_pcm_bytes_decode_into_unit_range(
            words in prop::collection::vec(any::<i16>(), 0..256)
        ) {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            let buffer = decode_frame(&STANDARD.encode(&bytes), 24_000).unwrap();
            prop_assert_eq!(buffer.samples.len(), words.len());
            for sample in &buffer.samples {
                prop_assert!((-1.0..=1.0).contains(sample));
            }
        }
    }
}
