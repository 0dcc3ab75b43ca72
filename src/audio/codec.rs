//! PCM16 transport codec.
//!
//! The realtime channel carries audio as base64-encoded PCM 16-bit signed
//! little-endian, mono, 24 kHz. Inside the process audio is normalized
//! `f32` in `[-1.0, 1.0]`. Both directions of the conversion live here and
//! are pure functions.

use base64::prelude::*;

use crate::error::{ClientError, Result};

/// Encode a frame of normalized samples into a base64 PCM16LE payload.
///
/// Samples are clamped to `[-1.0, 1.0]`. Scaling is asymmetric: negative
/// samples scale by 32768 and non-negative by 32767, so a full-scale
/// positive peak maps to `i16::MAX` without wrapping.
pub fn encode_frame(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    BASE64_STANDARD.encode(&bytes)
}

/// Decode a base64 PCM16LE payload into normalized samples.
///
/// Fails if the payload is not valid base64 or the decoded byte count is
/// not a multiple of two.
pub fn decode_payload(payload: &str) -> Result<Vec<f32>> {
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|e| ClientError::Decode(format!("invalid base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(ClientError::Decode(format!(
            "payload length {} is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_quantization_bound() {
        let frame: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.8)
            .collect();

        let decoded = decode_payload(&encode_frame(&frame)).unwrap();
        assert_eq!(decoded.len(), frame.len());
        for (a, b) in frame.iter().zip(decoded.iter()) {
            assert!(
                (a - b).abs() <= 1.0 / 32768.0,
                "sample drifted beyond quantization bound: {a} vs {b}"
            );
        }
    }

    #[test]
    fn test_repeated_cycles_are_bit_exact() {
        let frame = vec![0.0, 0.25, -0.25, 0.9, -0.9, 1.0, -1.0];
        let payload = encode_frame(&frame);
        let once = decode_payload(&payload).unwrap();
        let payload_again = encode_frame(&once);
        assert_eq!(payload, payload_again);
        assert_eq!(once, decode_payload(&payload_again).unwrap());
    }

    #[test]
    fn test_asymmetric_peak_scaling() {
        let payload = encode_frame(&[1.0, -1.0]);
        let bytes = BASE64_STANDARD.decode(payload).unwrap();
        let pos = i16::from_le_bytes([bytes[0], bytes[1]]);
        let neg = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(pos, i16::MAX);
        assert_eq!(neg, i16::MIN);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let decoded = decode_payload(&encode_frame(&[2.0, -3.5])).unwrap();
        assert!((decoded[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
        assert!((decoded[1] + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_odd_byte_count() {
        let payload = BASE64_STANDARD.encode([0u8, 1, 2]);
        match decode_payload(&payload) {
            Err(ClientError::Decode(_)) => {}
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_invalid_base64() {
        assert!(matches!(
            decode_payload("not!!valid@@base64"),
            Err(ClientError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_frame() {
        let payload = encode_frame(&[]);
        assert!(decode_payload(&payload).unwrap().is_empty());
    }
}
