//! # Agent Wire Protocol
//!
//! JSON messages exchanged with the conversational agent over text frames.
//! Inbound messages are keyed by a `type` field with a nested `*_event`
//! object; outbound messages are either a bare audio chunk or a typed control
//! reply.
//!
//! ## Message Types:
//! - **Inbound**: `audio`, `user_transcript`, `agent_response`,
//!   `conversation_initiation_metadata`, `ping`, `vad_score`,
//!   `internal_tentative_agent_response`; anything else is [`InboundMessage::Unknown`]
//! - **Outbound**: `{"user_audio_chunk": ...}` and `{"type": "pong", "event_id": ...}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message received from the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Audio {
        audio_event: AudioEvent,
    },
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadataEvent,
    },
    Ping {
        ping_event: PingEvent,
    },
    VadScore {
        vad_score_event: VadScoreEvent,
    },
    InternalTentativeAgentResponse {
        tentative_agent_response_internal_event: TentativeResponseEvent,
    },
    /// Any `type` this client does not handle
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    #[serde(default)]
    pub event_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserTranscriptionEvent {
    #[serde(default)]
    pub user_transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentResponseEvent {
    #[serde(default)]
    pub agent_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitiationMetadataEvent {
    #[serde(default)]
    pub user_input_audio_format: Option<String>,
    #[serde(default)]
    pub agent_output_audio_format: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingEvent {
    /// Echoed back verbatim, whatever its JSON type
    pub event_id: Value,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VadScoreEvent {
    pub vad_score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TentativeResponseEvent {
    #[serde(default)]
    pub tentative_agent_response: Option<String>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Audio { .. } => "audio",
            InboundMessage::UserTranscript { .. } => "user_transcript",
            InboundMessage::AgentResponse { .. } => "agent_response",
            InboundMessage::ConversationInitiationMetadata { .. } => {
                "conversation_initiation_metadata"
            }
            InboundMessage::Ping { .. } => "ping",
            InboundMessage::VadScore { .. } => "vad_score",
            InboundMessage::InternalTentativeAgentResponse { .. } => {
                "internal_tentative_agent_response"
            }
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// The raw `type` field of a frame, used to name unknown messages in logs.
pub fn message_type(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

/// Message sent to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    UserAudioChunk { user_audio_chunk: String },
    Control(ControlMessage),
}

/// Typed protocol replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Pong { event_id: Value },
}

impl OutboundMessage {
    pub fn audio_chunk(base64_pcm: String) -> Self {
        OutboundMessage::UserAudioChunk {
            user_audio_chunk: base64_pcm,
        }
    }

    pub fn pong(event_id: Value) -> Self {
        OutboundMessage::Control(ControlMessage::Pong { event_id })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::UserAudioChunk { .. } => "user_audio_chunk",
            OutboundMessage::Control(ControlMessage::Pong { .. }) => "pong",
        }
    }
}
