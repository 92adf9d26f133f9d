//! # Error Handling
//!
//! Error types for the voice-conversation client and how they map onto the
//! conversation's public error field.
//!
//! ## Error Categories:
//! - **Permission**: microphone access was denied
//! - **Connection**: the agent endpoint could not be reached or dropped the session
//! - **Signal**: a captured utterance failed the quality gate (local, retryable)
//! - **Container**: a captured file had a broken WAV header
//! - **Playback**: the reply could not be played (recovered by a fallback timer)
//!
//! Only permission and connection errors end a session. Everything else is
//! scoped to a single turn and leaves the conversation in `listening`.

use crate::audio::container::ContainerError;
use crate::audio::quality::SignalError;
use crate::state::ConversationPhase;
use thiserror::Error;

/// Crate-wide error type.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Connection("agent id not configured".to_string()));
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// Microphone access was refused by the platform
    #[error("Audio recording permission denied")]
    PermissionDenied,

    /// Handshake failure, missing endpoint/credentials or abnormal close
    #[error("Connection error: {0}")]
    Connection(String),

    /// Capture device busy or unavailable
    #[error("Failed to start recording: {0}")]
    CaptureStart(String),

    /// Capture device failed while stopping or reading back the recording
    #[error("Capture error: {0}")]
    Capture(String),

    /// Quality gate rejection
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// WAV container could not be parsed
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Outbound message could not be delivered
    #[error("Transport error: {0}")]
    Transport(String),

    /// Playback device failed to start or route audio
    #[error("Playback error: {0}")]
    Playback(String),

    /// Agent audio payload was not valid base64
    #[error("Invalid audio payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The agent did not answer within the response window
    #[error("No response from AI - please try again")]
    NoResponse,

    /// Command is not valid for the current phase
    #[error("Cannot {action} while {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: ConversationPhase,
    },

    /// Transient file storage failure
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The conversation controller task has shut down
    #[error("Conversation controller is no longer running")]
    ControllerGone,
}

impl AppError {
    /// Whether the error only affects the current turn.
    ///
    /// Recoverable errors are surfaced through the error field while the
    /// conversation stays usable; the others end the session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::PermissionDenied
                | AppError::Connection(_)
                | AppError::ControllerGone
        )
    }

    /// Text shown to the user when this error ends a turn.
    ///
    /// Gate rejections and timeouts carry their own guidance; anything else
    /// collapses to the generic processing failure.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Signal(_)
            | AppError::NoResponse
            | AppError::PermissionDenied
            | AppError::Connection(_) => self.to_string(),
            AppError::CaptureStart(_) => "Failed to start recording".to_string(),
            _ => "Failed to process audio".to_string(),
        }
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
