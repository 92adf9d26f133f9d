//! # Configuration Management
//!
//! This module loads the client's configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: converts between the config structs and TOML/env values
//! - **#[serde(default)]**: lets a partial config.toml fill in missing fields
//! - **Duration helpers**: millisecond settings are exposed as `std::time::Duration`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `ELEVENLABS_AGENT_ID` (agent identifier only)
//! 2. Environment variables (APP_AGENT__ENDPOINT, APP_CONVERSATION__RESPONSE_TIMEOUT_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)

use crate::audio::AudioFormat;
use crate::error::{AppError, AppResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// Grouped by concern so each component only receives the section it needs:
/// the transport gets `agent`, the quality gate gets `quality`, and so on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub conversation: ConversationConfig,
    pub quality: QualityConfig,
    pub storage: StorageConfig,
    pub device: DeviceConfig,
}

/// Remote agent connection settings.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the conversational agent service
/// - `agent_id`: which agent to talk to (appended as `?agent_id=`)
/// - `handshake_timeout_ms`: upper bound on the WebSocket handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub endpoint: String,
    pub agent_id: String,
    pub handshake_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.elevenlabs.io/v1/convai/conversation".to_string(),
            agent_id: String::new(), // must come from config.toml or the environment
            handshake_timeout_ms: 10_000,
        }
    }
}

impl AgentConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn endpoint(&self) -> AgentEndpoint {
        AgentEndpoint::new(self.endpoint.clone(), self.agent_id.clone())
    }
}

/// Turn-taking timers and protocol expectations.
///
/// ## Fields:
/// - `response_timeout_ms`: how long to wait for the agent after sending an utterance
/// - `playback_fallback_ms`: return to listening this long after playback failed to start
/// - `playback_stall_grace_ms`: return to listening this long after the device lost its completion signal
/// - `low_vad_score`: VAD scores below this are logged as a possible capture problem
/// - `expected_audio_format`: the negotiated format we expect in the initiation metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub response_timeout_ms: u64,
    pub playback_fallback_ms: u64,
    pub playback_stall_grace_ms: u64,
    pub low_vad_score: f64,
    pub expected_audio_format: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 15_000,
            playback_fallback_ms: 3_000,
            playback_stall_grace_ms: 2_000,
            low_vad_score: 0.3,
            expected_audio_format: AudioFormat::AGENT.wire_name(),
        }
    }
}

impl ConversationConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn playback_fallback(&self) -> Duration {
        Duration::from_millis(self.playback_fallback_ms)
    }

    pub fn playback_stall_grace(&self) -> Duration {
        Duration::from_millis(self.playback_stall_grace_ms)
    }
}

/// Thresholds for the signal quality gate.
///
/// ## Fields:
/// - `min_file_bytes`: captures smaller than this are too short (8000 bytes is 0.25 s)
/// - `noise_floor`: peak magnitudes at or below this count as silence
/// - `amplitude_scan_bytes`: how much of the payload the amplitude check looks at
/// - `min_duration_secs`: shorter utterances are sent but logged
/// - `hard_min_duration_secs`: shorter utterances are rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_file_bytes: u64,
    pub noise_floor: u16,
    pub amplitude_scan_bytes: usize,
    pub min_duration_secs: f64,
    pub hard_min_duration_secs: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_file_bytes: 8000,
            noise_floor: 100,
            amplitude_scan_bytes: 1000,
            min_duration_secs: 1.0,
            hard_min_duration_secs: 0.8,
        }
    }
}

/// Where transient capture and playback files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub transient_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            transient_dir: env::temp_dir().join("agent-voice"),
        }
    }
}

/// Headless device settings used by the command-line driver.
///
/// ## Fields:
/// - `capture_source`: WAV or raw PCM file replayed as each recorded utterance
/// - `microphone_granted`: answer given to the microphone permission prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub capture_source: PathBuf,
    pub microphone_granted: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capture_source: PathBuf::from("utterance.wav"),
            microphone_granted: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Apply `ELEVENLABS_AGENT_ID` if set
    ///
    /// ## Environment Variable Examples:
    /// - `APP_AGENT__ENDPOINT=ws://localhost:9000/convai`: point at a local agent
    /// - `APP_CONVERSATION__RESPONSE_TIMEOUT_MS=20000`: wait longer for replies
    /// - `APP_DEVICE__CAPTURE_SOURCE=hello.wav`: utterance replayed by `record`
    /// - `ELEVENLABS_AGENT_ID=agent_123`: agent identifier
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections so field names keep their own underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(agent_id) = env::var("ELEVENLABS_AGENT_ID") {
            settings = settings.set_override("agent.agent_id", agent_id)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint is a ws:// or wss:// URL
    /// - Every timer is non-zero
    /// - The quality thresholds are ordered (hard floor ≤ soft floor) and non-degenerate
    ///
    /// A missing agent id is not checked here; it surfaces as a connection
    /// error when a conversation starts, so the client can still be inspected
    /// without credentials.
    pub fn validate(&self) -> Result<()> {
        if !(self.agent.endpoint.starts_with("ws://") || self.agent.endpoint.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Agent endpoint must be a ws:// or wss:// URL, got '{}'",
                self.agent.endpoint
            ));
        }

        if self.agent.handshake_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Handshake timeout must be greater than 0"));
        }

        let conversation = &self.conversation;
        if conversation.response_timeout_ms == 0
            || conversation.playback_fallback_ms == 0
            || conversation.playback_stall_grace_ms == 0
        {
            return Err(anyhow::anyhow!("Conversation timers must be greater than 0"));
        }

        let quality = &self.quality;
        if quality.amplitude_scan_bytes < 2 {
            return Err(anyhow::anyhow!("Amplitude scan must cover at least one sample"));
        }

        if quality.hard_min_duration_secs < 0.0
            || quality.hard_min_duration_secs > quality.min_duration_secs
        {
            return Err(anyhow::anyhow!(
                "Hard minimum duration ({}) must be between 0 and the minimum duration ({})",
                quality.hard_min_duration_secs,
                quality.min_duration_secs
            ));
        }

        Ok(())
    }
}

/// Where a conversation connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub base_url: String,
    pub agent_id: String,
}

impl AgentEndpoint {
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent_id: agent_id.into(),
        }
    }

    /// Full connection URL with the agent identifier as a query parameter.
    ///
    /// Fails with a connection error if no agent id is configured, since the
    /// remote side would reject the handshake anyway.
    pub fn url(&self) -> AppResult<String> {
        let agent_id = self.agent_id.trim();
        if agent_id.is_empty() {
            return Err(AppError::Connection("agent id not configured".to_string()));
        }
        if self.base_url.trim().is_empty() {
            return Err(AppError::Connection("agent endpoint not configured".to_string()));
        }
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}agent_id={}", self.base_url, separator, agent_id))
    }
}
