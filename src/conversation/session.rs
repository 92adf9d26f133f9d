//! One connection to the agent, from handshake to close.

use crate::transport::SessionTransport;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// A live conversation session.
///
/// Owns its transport exclusively; dropping the session closes the
/// connection. Sessions are never reused: a restart opens a new one.
#[derive(Debug)]
pub struct ConversationSession {
    pub id: Uuid,
    pub transport: SessionTransport,

    /// Identifier the agent assigned in its initiation metadata
    pub conversation_id: Option<String>,

    pub started_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(transport: SessionTransport) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            transport,
            conversation_id: None,
            started_at: Utc::now(),
        };
        info!(session = %session.id, "Conversation session opened");
        session
    }

    /// Close the transport and report how long the session lasted.
    pub fn close(mut self) {
        self.transport.close();
        let elapsed = Utc::now() - self.started_at;
        info!(
            session = %self.id,
            conversation_id = ?self.conversation_id,
            duration_secs = elapsed.num_seconds(),
            "Conversation session closed"
        );
    }
}
