//! # Session Transport
//!
//! One duplex message channel to the agent per conversation session.
//!
//! ## Key Components:
//! - **Connector**: opens the underlying connection (WebSocket in production,
//!   in-memory channels in tests) and returns a [`TransportLink`]
//! - **SessionTransport**: the session's exclusive handle on that link; sends
//!   outbound messages, yields inbound events in arrival order and answers
//!   keepalive pings
//!
//! ## Lifecycle:
//! `open` → any number of `send`/`recv` → `close` (idempotent, also run on drop).
//! A transport is never reopened; a new session opens a new one.

use crate::config::AgentEndpoint;
use crate::error::{AppError, AppResult};
use crate::protocol::{InboundMessage, OutboundMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Close code sent and expected for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Frame handed to the connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message(OutboundMessage),
    /// Send a normal close frame and stop writing
    Close,
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A protocol message, delivered in arrival order
    Message(InboundMessage),
    /// The connection closed; `clean` means close code 1000
    Closed {
        code: Option<u16>,
        reason: String,
        clean: bool,
    },
    /// Transport-level failure (I/O or protocol violation)
    Failed(String),
}

impl TransportEvent {
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        TransportEvent::Closed {
            code,
            reason: reason.into(),
            clean: code == Some(NORMAL_CLOSURE),
        }
    }
}

/// Channel pair connecting a session to a live connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the agent.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish one connection; fails with [`AppError::Connection`].
    async fn connect(&self, endpoint: &AgentEndpoint) -> AppResult<TransportLink>;
}

/// A session's exclusive handle on its connection.
#[derive(Debug)]
pub struct SessionTransport {
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    inbound: mpsc::Receiver<TransportEvent>,
    /// Event taken off the connection but not yet returned by `recv`
    pending: Option<TransportEvent>,
}

impl SessionTransport {
    /// Open a connection to `endpoint` through `connector`.
    pub async fn open(connector: &dyn Connector, endpoint: &AgentEndpoint) -> AppResult<Self> {
        let link = connector.connect(endpoint).await?;
        info!("Agent transport connected");
        Ok(Self::from_link(link))
    }

    pub fn from_link(link: TransportLink) -> Self {
        Self {
            outbound: Some(link.outbound),
            inbound: link.inbound,
            pending: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Queue a message for the writer.
    ///
    /// Callers gate on phase; sending on a closed transport is an error.
    pub async fn send(&self, message: OutboundMessage) -> AppResult<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| AppError::Transport("transport is closed".to_string()))?;

        let kind = message.kind();
        outbound
            .send(OutboundFrame::Message(message))
            .await
            .map_err(|_| AppError::Transport("connection writer has stopped".to_string()))?;
        debug!(kind, "Queued outbound message");
        Ok(())
    }

    /// Next inbound event, or `None` once the connection is gone.
    ///
    /// Pings are answered with a pong before the event is returned.
    ///
    /// Cancel safe: if the future is dropped while the pong waits for room in
    /// the outbound queue, the ping is kept and answered by the next call.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        if self.pending.is_none() {
            self.pending = Some(self.inbound.recv().await?);
        }

        if let Some(TransportEvent::Message(InboundMessage::Ping { ping_event })) = &self.pending {
            debug!(event_id = %ping_event.event_id, "Replying to ping");
            let pong = OutboundMessage::pong(ping_event.event_id.clone());
            if let Err(e) = self.send(pong).await {
                warn!("Failed to send pong: {}", e);
            }
        }
        self.pending.take()
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            match outbound.try_send(OutboundFrame::Close) {
                Ok(()) => info!("Agent transport closing"),
                // The writer exits when the last sender drops, closing the socket anyway.
                Err(e) => debug!("Close frame not queued: {}", e),
            }
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}
