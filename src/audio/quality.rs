//! # Signal Quality Gate
//!
//! Inspects a finished capture and decides whether it is worth sending to the
//! agent. Every rejection is user-correctable: the conversation stays in
//! `listening` and the reason is shown to the user.
//!
//! ## Checks (in order):
//! 1. **Existence**: the capture file must exist
//! 2. **Empty file**: zero bytes means nothing was recorded
//! 3. **File size**: below the minimum the recording is too short to transcribe
//! 4. **Amplitude**: the first samples must rise above the noise floor
//! 5. **Duration**: the PCM payload must reach the hard duration floor

use crate::audio::buffer::CaptureBuffer;
use crate::audio::{container, encoding, AudioFormat};
use crate::config::QualityConfig;
use crate::error::AppResult;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Reasons the gate rejects a capture.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("Recorded audio file does not exist")]
    CaptureMissing,

    #[error("No audio recorded - try speaking louder or closer to microphone")]
    SilentCapture,

    #[error("Recording too short ({duration_secs:.1}s). Please record for at least 2-3 seconds.")]
    CaptureTooShort { duration_secs: f64 },

    #[error("Audio too quiet - please speak louder")]
    CaptureTooQuiet { peak: u16 },
}

/// A capture that passed the gate, ready for transport encoding.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Signed 16-bit little-endian PCM without any container header
    pub pcm: Vec<u8>,
    pub duration_secs: f64,
    /// Largest sample magnitude seen in the amplitude window
    pub peak: u16,
}

/// Applies [`QualityConfig`] thresholds to captured audio.
#[derive(Debug, Clone)]
pub struct SignalQualityGate {
    config: QualityConfig,
    format: AudioFormat,
}

impl SignalQualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            format: AudioFormat::AGENT,
        }
    }

    /// Run every check against a capture.
    ///
    /// ## Returns:
    /// - **Ok(Utterance)**: normalized PCM that may be transmitted
    /// - **Err(AppError::Signal)**: a quality rejection
    /// - **Err(AppError::Container)**: the WAV header could not be parsed
    pub fn inspect(&self, capture: &CaptureBuffer) -> AppResult<Utterance> {
        if !capture.file.exists {
            return Err(SignalError::CaptureMissing.into());
        }

        if capture.file.size == 0 {
            warn!("Recorded audio file is empty");
            return Err(SignalError::SilentCapture.into());
        }

        if capture.file.size < self.config.min_file_bytes {
            let duration_secs = self.format.duration_secs(capture.file.size);
            warn!(
                size = capture.file.size,
                "Recording too short - try speaking for at least 1-2 seconds"
            );
            return Err(SignalError::CaptureTooShort { duration_secs }.into());
        }

        let payload = container::unwrap(&capture.bytes)?;
        debug!(
            container = capture.is_container(),
            payload_bytes = payload.len(),
            "Extracted PCM payload"
        );
        if payload.len() < 1000 {
            warn!("Very little PCM data extracted: {} bytes", payload.len());
        }

        let peak = self.peak_amplitude(payload);
        if peak == 0 {
            warn!("Audio is digital silence");
            return Err(SignalError::SilentCapture.into());
        }
        if peak <= self.config.noise_floor {
            warn!(peak, "Audio appears to be silent or very quiet");
            return Err(SignalError::CaptureTooQuiet { peak }.into());
        }

        let pcm = encoding::normalize_pcm16(payload);
        let duration_secs = self.format.duration_secs(pcm.len() as u64);
        if duration_secs < self.config.min_duration_secs {
            warn!("Audio short for transcription: {:.2} seconds", duration_secs);
            if duration_secs < self.config.hard_min_duration_secs {
                return Err(SignalError::CaptureTooShort { duration_secs }.into());
            }
        }

        debug!(duration_secs, peak, "Capture passed quality gate");
        Ok(Utterance {
            pcm,
            duration_secs,
            peak,
        })
    }

    /// Largest sample magnitude within the configured scan window.
    fn peak_amplitude(&self, pcm: &[u8]) -> u16 {
        let window = &pcm[..pcm.len().min(self.config.amplitude_scan_bytes)];
        let mut cursor = Cursor::new(window);
        let mut peak = 0u16;
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            peak = peak.max(sample.unsigned_abs());
        }
        peak
    }
}
