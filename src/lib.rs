//! # Agent Voice Client
//!
//! Real-time voice conversation with a remote conversational agent: capture
//! an utterance, check its signal quality, send it as base64 PCM over one
//! WebSocket, and play back the agent's PCM replies while a single-writer
//! state machine drives the turn-taking.
//!
//! ## Module Overview:
//! - **audio**: WAV container codec, transport encoding, quality gate, device session
//! - **conversation**: the state machine and its command handle
//! - **transport** / **websocket** / **protocol**: the agent connection and its messages
//! - **device**: platform device seams plus headless implementations
//! - **config** / **state** / **error**: ambient configuration, published state, errors

pub mod audio;
pub mod config;
pub mod conversation;
pub mod device;
pub mod error;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use conversation::ConversationHandle;
pub use error::{AppError, AppResult};
pub use state::{ConversationPhase, ConversationState};
