//! # WebSocket Agent Connection
//!
//! [`Connector`] implementation that talks to the agent over a WebSocket.
//!
//! ## Connection Protocol:
//! 1. **Handshake**: connect to `<endpoint>?agent_id=<id>`, bounded by the handshake timeout
//! 2. **Writer task**: serializes outbound messages into JSON text frames
//! 3. **Reader task**: parses JSON text frames into inbound messages, in arrival order
//! 4. **Close**: a close request sends a normal (1000) close frame; a close from
//!    the agent is reported with its code
//!
//! ## Message Format:
//! - **Client → Agent**: JSON text frames (`user_audio_chunk`, `pong`)
//! - **Agent → Client**: JSON text frames keyed by `type`
//!
//! Binary frames and WebSocket-level ping/pong are not protocol messages and
//! are ignored here; tungstenite answers transport pings on its own.

use crate::config::AgentEndpoint;
use crate::error::{AppError, AppResult};
use crate::protocol::{self, InboundMessage};
use crate::transport::{Connector, OutboundFrame, TransportEvent, TransportLink};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

/// Frames buffered in each direction before senders wait.
const CHANNEL_CAPACITY: usize = 64;

/// Opens agent sessions over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &AgentEndpoint) -> AppResult<TransportLink> {
        let url = endpoint.url()?;
        info!(endpoint = %endpoint.base_url, "Connecting to agent");

        let (stream, response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    AppError::Connection(format!(
                        "handshake did not complete within {}ms",
                        self.handshake_timeout.as_millis()
                    ))
                })?
                .map_err(|e| AppError::Connection(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, source) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(source, inbound_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Drain outbound frames onto the socket until closed.
async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<OutboundFrame>)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Message(message) => {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to serialize {} message: {}", message.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket send failed: {}", e);
                    return;
                }
            }
            OutboundFrame::Close => break,
        }
    }

    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "conversation ended".into(),
    }));
    if let Err(e) = sink.send(close).await {
        debug!("Close frame not delivered: {}", e);
    }
    debug!("WebSocket writer finished");
}

/// Forward parsed inbound frames until the connection ends.
async fn read_loop<S>(mut source: S, inbound: mpsc::Sender<TransportEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let terminal = loop {
        let frame = match source.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break TransportEvent::Failed(e.to_string()),
            None => break TransportEvent::closed(None, "connection ended without close frame"),
        };

        match frame {
            Message::Text(text) => match InboundMessage::parse(&text) {
                Ok(message) => {
                    if message == InboundMessage::Unknown {
                        debug!(kind = ?protocol::message_type(&text), "Unhandled message type");
                    }
                    if inbound.send(TransportEvent::Message(message)).await.is_err() {
                        // Session dropped; nobody is listening.
                        return;
                    }
                }
                Err(e) => warn!("Skipping unparseable agent message: {}", e),
            },
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or((None, String::new()));
                info!(?code, %reason, "Agent closed the connection");
                break TransportEvent::closed(code, reason);
            }
            Message::Binary(bytes) => debug!(len = bytes.len(), "Ignoring binary frame"),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    };

    let _ = inbound.send(terminal).await;
}
