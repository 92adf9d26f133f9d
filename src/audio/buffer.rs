//! # Audio Buffers
//!
//! Transient value objects that carry audio through one pass of the pipeline:
//! a [`CaptureBuffer`] for one recorded utterance and an [`AgentAudioReply`]
//! for one chunk of agent speech. Neither is shared; each is produced,
//! consumed and dropped within a single turn.

use crate::audio::{container, encoding, AudioFormat};
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

/// Existence and size of a transient file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMetadata {
    pub exists: bool,
    pub size: u64,
}

impl FileMetadata {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn present(size: u64) -> Self {
        Self { exists: true, size }
    }
}

/// Raw bytes recorded from the microphone for one utterance.
///
/// The format is always [`AudioFormat::AGENT`]; the backing file is deleted
/// after transmission or when the utterance is abandoned.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    /// Backing file written by the capture device
    pub path: PathBuf,

    /// Metadata read when capture stopped
    pub file: FileMetadata,

    /// File contents (empty if the file is missing)
    pub bytes: Vec<u8>,

    /// Format the device was configured with
    pub format: AudioFormat,
}

impl CaptureBuffer {
    pub fn new(path: PathBuf, file: FileMetadata, bytes: Vec<u8>) -> Self {
        Self {
            path,
            file,
            bytes,
            format: AudioFormat::AGENT,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the recording carries a WAV header rather than bare samples.
    pub fn is_container(&self) -> bool {
        container::is_container(&self.bytes)
    }
}

/// PCM audio received from the agent, ready for playback.
#[derive(Debug, Clone)]
pub struct AgentAudioReply {
    pub id: Uuid,

    /// Transport-decoded PCM
    pub pcm: Vec<u8>,

    /// PCM wrapped in a playable WAV container
    pub container: Vec<u8>,

    /// Unique name for the transient playback file
    pub file_name: String,

    pub received_at: DateTime<Utc>,
}

impl AgentAudioReply {
    /// Decode a base64 `audio_event` payload and wrap it for playback.
    pub fn from_base64(payload: &str) -> AppResult<Self> {
        let pcm = encoding::decode(payload)?;
        Ok(Self::from_pcm(pcm))
    }

    pub fn from_pcm(pcm: Vec<u8>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            container: container::wrap_agent_pcm(&pcm),
            pcm,
            file_name: format!("agent_reply_{}.wav", id.simple()),
            received_at: Utc::now(),
        }
    }

    /// Playback length at the agent's output format.
    pub fn duration_secs(&self) -> f64 {
        AudioFormat::AGENT.duration_secs(self.pcm.len() as u64)
    }
}
