//! # Audio Processing Module
//!
//! Everything that touches audio bytes on their way to and from the agent.
//!
//! ## Key Components:
//! - **Container**: 44-byte WAV header wrap/unwrap
//! - **Repair**: re-header PCM files saved without a usable WAV header
//! - **Encoding**: base64 transport encoding and sample normalization
//! - **Quality**: signal quality gate applied before transmission
//! - **Buffer**: capture buffers and agent replies as value objects
//! - **Session**: capture/playback device coordination
//! - **Storage**: transient files for captures and replies
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;     // Capture buffers and agent replies
pub mod container;  // WAV container codec
pub mod encoding;   // Base64 transport encoding
pub mod quality;    // Signal quality gate
pub mod repair;     // Headerless WAV repair
pub mod session;    // Capture/playback session manager
pub mod storage;    // Transient file storage

use serde::{Deserialize, Serialize};

/// PCM format description.
///
/// The agent only accepts [`AudioFormat::AGENT`]; the type exists so the
/// container header and duration maths have a single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16kHz mono 16-bit, the format negotiated as `pcm_16000`.
    pub const AGENT: AudioFormat = AudioFormat::new(16000, 1, 16);

    /// Create a new audio format description.
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    /// Bytes per sample frame (all channels).
    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    /// Playback duration of `byte_len` bytes of PCM in this format.
    pub fn duration_secs(&self, byte_len: u64) -> f64 {
        byte_len as f64 / f64::from(self.byte_rate())
    }

    /// Wire name used in the agent's initiation metadata.
    pub fn wire_name(&self) -> String {
        format!("pcm_{}", self.sample_rate)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::AGENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_format_maths() {
        let format = AudioFormat::AGENT;
        assert_eq!(format.byte_rate(), 32000);
        assert_eq!(format.block_align(), 2);
        assert!((format.duration_secs(32000) - 1.0).abs() < f64::EPSILON);
        assert_eq!(format.wire_name(), "pcm_16000");
    }
}
