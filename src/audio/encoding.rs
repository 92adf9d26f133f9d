//! # Frame Transport Encoding
//!
//! The agent protocol is JSON over text frames, so PCM travels as standard
//! base64. This module also re-normalizes captured samples into signed 16-bit
//! little-endian form before they are encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tracing::warn;

/// Encode binary PCM for embedding in a text message.
pub fn encode(pcm: &[u8]) -> String {
    STANDARD.encode(pcm)
}

/// Decode a base64 payload received from the agent.
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Reinterpret a raw 16-bit word as a signed sample.
///
/// Values in `0..=32767` are kept; `32768..=65535` wrap to `-32768..=-1`.
pub fn sample_from_unsigned(raw: u16) -> i16 {
    i16::from_le_bytes(raw.to_le_bytes())
}

/// Rewrite a PCM buffer as signed 16-bit little-endian samples.
///
/// ## Process:
/// 1. Drop a trailing odd byte (it cannot form a sample)
/// 2. Read each word unsigned and reinterpret it as signed
/// 3. Write the signed sample back little-endian
pub fn normalize_pcm16(bytes: &[u8]) -> Vec<u8> {
    let even_len = bytes.len() & !1;
    if even_len != bytes.len() {
        warn!("Odd number of PCM bytes ({}), truncating last byte", bytes.len());
    }

    let mut cursor = Cursor::new(&bytes[..even_len]);
    let mut out = Vec::with_capacity(even_len);
    while let Ok(raw) = cursor.read_u16::<LittleEndian>() {
        out.extend_from_slice(&sample_from_unsigned(raw).to_le_bytes());
    }
    out
}
