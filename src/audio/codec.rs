//! Sample format conversions and transport encoding
//!
//! The realtime endpoint speaks little-endian PCM16 wrapped in base64 text.

use base64::Engine;

use crate::error::ProtocolError;

/// Convert normalized float samples to PCM16.
///
/// Input is clamped to `[-1, 1]`. Negative values scale by 32768 and
/// positive values by 32767 so both full-scale ends fit without overflow.
/// Scaled values truncate toward zero.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert PCM16 samples to floats in `[-1, 1)`.
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Reinterpret little-endian bytes as PCM16. A trailing odd byte is ignored.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// Float samples to the base64 text carried in a media chunk.
pub fn encode_float_frame(samples: &[f32]) -> String {
    encode_base64(&pcm16_to_le_bytes(&float_to_pcm16(samples)))
}

/// Base64 text from an inline data part to float samples.
pub fn decode_float_frame(text: &str) -> Result<Vec<f32>, ProtocolError> {
    let bytes = decode_base64(text)?;
    Ok(pcm16_to_float(&le_bytes_to_pcm16(&bytes)))
}
