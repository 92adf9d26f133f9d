//! # WAV Container Codec
//!
//! Wraps raw PCM in the minimal 44-byte RIFF/WAVE header needed for playback and
//! strips that header again from captured files.
//!
//! ## Header Layout (all fields little-endian):
//! ```text
//!  0 "RIFF"   4 36+dataSize   8 "WAVE"
//! 12 "fmt "  16 16           20 format tag (1 = PCM)
//! 22 channels 24 sample rate 28 byte rate  32 block align  34 bits/sample
//! 36 "data"  40 dataSize     44 PCM samples...
//! ```
//!
//! Captures may arrive either containerized or as bare PCM; both are valid.

use crate::audio::AudioFormat;
use thiserror::Error;
use tracing::{debug, warn};

/// Size of the canonical PCM WAV header.
pub const HEADER_LEN: usize = 44;

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WAVE_MAGIC: &[u8; 4] = b"WAVE";
const FMT_MARKER: &[u8; 4] = b"fmt ";
const DATA_MARKER: &[u8; 4] = b"data";

/// Offset of the `WAVE` form type.
const WAVE_OFFSET: usize = 8;
/// First byte examined when looking for the data chunk.
const CHUNK_SCAN_START: usize = 12;
/// The data-chunk scan never looks past this many bytes.
const CHUNK_SCAN_LIMIT: usize = 200;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Failures while stripping a WAV container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// Starts with `RIFF` but has no `WAVE` form type.
    #[error("Invalid audio format - not a valid WAVE file")]
    Malformed,

    /// Starts with `RIFF` but cannot even hold a header.
    #[error("Audio file too small to contain valid WAV header ({len} bytes)")]
    Truncated { len: usize },
}

/// Whether `bytes` start with the RIFF signature.
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.len() >= RIFF_MAGIC.len() && &bytes[..RIFF_MAGIC.len()] == RIFF_MAGIC
}

/// Build a playable WAV file from raw PCM.
///
/// ## Parameters:
/// - **pcm**: signed 16-bit little-endian samples (not inspected)
/// - **format**: describes the samples for the `fmt ` chunk
pub fn wrap(pcm: &[u8], format: AudioFormat) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());

    out.extend_from_slice(RIFF_MAGIC);
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(WAVE_MAGIC);

    out.extend_from_slice(FMT_MARKER);
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    out.extend_from_slice(DATA_MARKER);
    out.extend_from_slice(&data_len.to_le_bytes());

    out.extend_from_slice(pcm);
    out
}

/// [`wrap`] with the agent's fixed output format.
pub fn wrap_agent_pcm(pcm: &[u8]) -> Vec<u8> {
    wrap(pcm, AudioFormat::AGENT)
}

/// Return the PCM payload of a WAV file, or the input itself if it is bare PCM.
///
/// The data chunk is located by scanning for its marker within the first
/// 200 bytes. When the marker is missing the canonical 44-byte offset is used.
pub fn unwrap(bytes: &[u8]) -> Result<&[u8], ContainerError> {
    if !is_container(bytes) {
        debug!("No RIFF signature, treating {} bytes as raw PCM", bytes.len());
        return Ok(bytes);
    }

    if bytes.len() < HEADER_LEN {
        return Err(ContainerError::Truncated { len: bytes.len() });
    }

    if &bytes[WAVE_OFFSET..WAVE_OFFSET + WAVE_MAGIC.len()] != WAVE_MAGIC {
        return Err(ContainerError::Malformed);
    }

    let offset = match find_data_chunk(bytes) {
        Some(marker) => {
            debug!("Found 'data' chunk at offset {}", marker);
            marker + 8
        }
        None => {
            warn!("Could not find 'data' chunk, using default offset {}", HEADER_LEN);
            HEADER_LEN
        }
    };

    Ok(&bytes[offset.min(bytes.len())..])
}

/// Position of the `data` marker, bounded to the first [`CHUNK_SCAN_LIMIT`] bytes.
fn find_data_chunk(bytes: &[u8]) -> Option<usize> {
    let end = CHUNK_SCAN_LIMIT.min(bytes.len().saturating_sub(DATA_MARKER.len()));
    (CHUNK_SCAN_START..end).find(|&i| &bytes[i..i + DATA_MARKER.len()] == DATA_MARKER)
}
