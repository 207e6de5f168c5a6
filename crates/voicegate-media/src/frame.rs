//! Inbound frame decoding: little-endian signed 16-bit PCM to normalized samples.

use voicegate_core::error::{Result, VoiceGateError};

const I16_SCALE: f32 = 32768.0;

/// Decode a raw binary frame into samples in `[-1.0, 1.0)`.
///
/// Fails on empty or odd-length input.
pub fn decode(raw: &[u8]) -> Result<Vec<f32>> {
    if raw.is_empty() {
        return Err(VoiceGateError::MalformedFrame("empty frame".into()));
    }
    if raw.len() % 2 != 0 {
        return Err(VoiceGateError::MalformedFrame(format!(
            "odd frame length {}",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / I16_SCALE)
        .collect())
}

/// Convert normalized samples back to 16-bit PCM, saturating out-of-range values.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
