//! # Conversation State
//!
//! The turn-taking phase and the snapshot the UI layer observes.
//!
//! ## Key Rust Concepts:
//!
//! ### Closed enums instead of status strings
//! - **ConversationPhase** lists every phase the conversation can be in
//! - `match` on it is checked for exhaustiveness at compile time
//!
//! ### Single writer, many readers
//! - **StatePublisher** is owned by the conversation controller task, which is the
//!   only code that ever changes the state
//! - **watch::Receiver**: readers always see the latest snapshot
//! - **broadcast::Receiver**: readers see every phase transition in order
//!
//! Nothing here is behind a lock; all mutation flows through the controller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Capacity of the transition broadcast before slow subscribers start lagging.
const TRANSITION_BUFFER: usize = 64;

/// Where the conversation is in the turn-taking cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationPhase {
    /// No session (initial and terminal)
    Disconnected,
    /// Acquiring permission and opening the transport
    Connecting,
    /// Connected and ready for the user to speak
    Listening,
    /// Utterance sent, response timer armed
    WaitingForResponse,
    /// Agent audio is playing
    Speaking,
    /// The session failed; a new one must be started
    Error,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPhase::Disconnected => "disconnected",
            ConversationPhase::Connecting => "connecting",
            ConversationPhase::Listening => "listening",
            ConversationPhase::WaitingForResponse => "waitingForResponse",
            ConversationPhase::Speaking => "speaking",
            ConversationPhase::Error => "error",
        }
    }

    /// Whether a live transport belongs to this phase.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConversationPhase::Listening
                | ConversationPhase::WaitingForResponse
                | ConversationPhase::Speaking
        )
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the conversation published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub phase: ConversationPhase,

    /// Human-readable reason for the last failure or rejection
    pub error: Option<String>,

    /// Identifier negotiated in the initiation metadata
    pub conversation_id: Option<String>,

    /// Whether the microphone is recording
    pub capturing: bool,

    /// Whether a recorded utterance is being checked and sent
    pub processing: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            phase: ConversationPhase::Disconnected,
            error: None,
            conversation_id: None,
            capturing: false,
            processing: false,
        }
    }
}

impl ConversationState {
    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }

    pub fn is_listening(&self) -> bool {
        self.phase == ConversationPhase::Listening
    }

    pub fn is_speaking(&self) -> bool {
        self.phase == ConversationPhase::Speaking
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.phase == ConversationPhase::WaitingForResponse
    }

    pub fn is_loading(&self) -> bool {
        self.phase == ConversationPhase::Connecting || self.processing
    }

    /// Boolean view for UI bindings.
    pub fn flags(&self) -> UiFlags {
        UiFlags {
            is_connected: self.is_connected(),
            is_listening: self.is_listening(),
            is_speaking: self.is_speaking(),
            is_waiting_for_response: self.is_waiting_for_response(),
            is_loading: self.is_loading(),
            is_recording: self.capturing,
            error: self.error.clone(),
        }
    }
}

/// Flags in the shape the UI layer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiFlags {
    pub is_connected: bool,
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_waiting_for_response: bool,
    pub is_loading: bool,
    pub is_recording: bool,
    pub error: Option<String>,
}

/// One phase change, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTransition {
    pub from: ConversationPhase,
    pub to: ConversationPhase,
    pub at: DateTime<Utc>,
}

/// Write side of the conversation state.
///
/// Owned by exactly one task. Every change is published on the watch channel;
/// phase changes are additionally broadcast as [`PhaseTransition`]s.
#[derive(Debug)]
pub struct StatePublisher {
    state: watch::Sender<ConversationState>,
    transitions: broadcast::Sender<PhaseTransition>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self { state, transitions }
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.state.borrow().phase
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.transitions.subscribe()
    }

    /// Move to `to`. Re-entering the current phase is not a transition.
    pub fn transition(&self, to: ConversationPhase) {
        let mut from = to;
        self.state.send_if_modified(|state| {
            from = state.phase;
            state.phase = to;
            if !to.is_connected() {
                state.capturing = false;
                state.processing = false;
            }
            from != to
        });

        if from != to {
            info!("Conversation phase: {} -> {}", from, to);
            // No subscribers is fine.
            let _ = self.transitions.send(PhaseTransition {
                from,
                to,
                at: Utc::now(),
            });
        }
    }

    pub fn set_error(&self, error: Option<String>) {
        if let Some(reason) = &error {
            debug!(%reason, "Surfacing error");
        }
        self.update(|state| state.error = error);
    }

    /// Apply an arbitrary change to the non-phase fields.
    pub fn update(&self, change: impl FnOnce(&mut ConversationState)) {
        self.state.send_modify(change);
    }

    /// Read-only view for other tasks.
    pub fn observer(&self) -> StateObserver {
        StateObserver {
            state: self.state.subscribe(),
            transitions: self.transitions.clone(),
        }
    }
}

/// Read side of the conversation state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateObserver {
    state: watch::Receiver<ConversationState>,
    // Only used to create receivers.
    transitions: broadcast::Sender<PhaseTransition>,
}

impl StateObserver {
    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.transitions.subscribe()
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&ConversationPhase::WaitingForResponse).unwrap(),
            "\"waitingForResponse\""
        );
        assert_eq!(ConversationPhase::WaitingForResponse.to_string(), "waitingForResponse");
    }

    #[test]
    fn test_flags_follow_phase() {
        let mut state = ConversationState::default();
        assert!(!state.flags().is_connected);

        state.phase = ConversationPhase::Connecting;
        assert!(state.is_loading());
        assert!(!state.is_connected());

        state.phase = ConversationPhase::Speaking;
        let flags = state.flags();
        assert!(flags.is_connected && flags.is_speaking && !flags.is_listening);

        let json = serde_json::to_value(&flags).unwrap();
        assert_eq!(json["isWaitingForResponse"], false);
        assert_eq!(json["isSpeaking"], true);
    }

    #[test]
    fn test_transitions_are_broadcast_once() {
        let publisher = StatePublisher::new();
        let mut transitions = publisher.subscribe_transitions();

        publisher.transition(ConversationPhase::Connecting);
        publisher.transition(ConversationPhase::Connecting);
        publisher.transition(ConversationPhase::Listening);

        let first = transitions.try_recv().unwrap();
        assert_eq!(
            (first.from, first.to),
            (ConversationPhase::Disconnected, ConversationPhase::Connecting)
        );
        let second = transitions.try_recv().unwrap();
        assert_eq!(
            (second.from, second.to),
            (ConversationPhase::Connecting, ConversationPhase::Listening)
        );
        assert!(transitions.try_recv().is_err());
    }

    #[test]
    fn test_observer_sees_updates() {
        let publisher = StatePublisher::new();
        let observer = publisher.observer();
        let mut transitions = observer.subscribe_transitions();

        publisher.transition(ConversationPhase::Connecting);
        publisher.set_error(Some("boom".to_string()));

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.phase, ConversationPhase::Connecting);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
        assert_eq!(transitions.try_recv().unwrap().to, ConversationPhase::Connecting);
    }

    #[test]
    fn test_leaving_session_clears_capture_flags() {
        let publisher = StatePublisher::new();
        publisher.transition(ConversationPhase::Listening);
        publisher.update(|state| state.capturing = true);

        publisher.transition(ConversationPhase::Disconnected);
        assert!(!publisher.snapshot().capturing);
    }
}
