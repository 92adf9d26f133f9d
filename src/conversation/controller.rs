//! The conversation actor: sole owner of the phase, the session and the timers.
//!
//! Every input (caller commands, results of spawned work, transport events,
//! timer expiry) is an event consumed one at a time by [`ConversationController::run`].
//! Work that can take a while runs in spawned tasks whose results come back
//! tagged with an epoch or reply id, so anything that finishes after a
//! stop, reset or restart is recognized as stale and dropped.

use crate::audio::buffer::AgentAudioReply;
use crate::audio::encoding;
use crate::audio::quality::SignalQualityGate;
use crate::audio::session::MediaSessionManager;
use crate::config::{AgentEndpoint, AppConfig, ConversationConfig};
use crate::conversation::session::ConversationSession;
use crate::error::{AppError, AppResult};
use crate::protocol::{InboundMessage, InitiationMetadataEvent, OutboundMessage};
use crate::state::{ConversationPhase, StatePublisher};
use crate::transport::{Connector, SessionTransport, TransportEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Caller requests, each acknowledged through its reply channel.
pub(crate) enum Command {
    Start { reply: oneshot::Sender<AppResult<()>> },
    Stop { reply: oneshot::Sender<()> },
    StartRecording { reply: oneshot::Sender<AppResult<()>> },
    StopRecording { reply: oneshot::Sender<AppResult<()>> },
    Reset { reply: oneshot::Sender<()> },
}

/// Results of work the controller spawned.
enum Internal {
    Connected {
        epoch: u64,
        result: AppResult<SessionTransport>,
    },
    UtteranceProcessed {
        epoch: u64,
        path: Option<PathBuf>,
        result: AppResult<OutboundMessage>,
        reply: oneshot::Sender<AppResult<()>>,
    },
    PlaybackStarted {
        reply_id: Uuid,
        path: PathBuf,
    },
    PlaybackFailed {
        reply_id: Uuid,
        error: AppError,
    },
    PlaybackFinished {
        reply_id: Uuid,
    },
    /// The device dropped the completion signal without firing it
    PlaybackStalled {
        reply_id: Uuid,
    },
}

/// The reply currently being played.
struct ActivePlayback {
    reply_id: Uuid,
    path: Option<PathBuf>,
    /// Return to listening at this instant if no completion arrives first
    fallback_at: Option<Instant>,
}

pub(crate) struct ConversationController {
    config: ConversationConfig,
    endpoint: AgentEndpoint,
    connector: Arc<dyn Connector>,
    media: MediaSessionManager,
    gate: SignalQualityGate,
    state: StatePublisher,

    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Internal>,
    events_rx: mpsc::UnboundedReceiver<Internal>,

    session: Option<ConversationSession>,
    /// Bumped whenever in-flight connects and utterances must be forgotten
    epoch: u64,
    pending_start: Option<oneshot::Sender<AppResult<()>>>,
    response_deadline: Option<Instant>,
    playback: Option<ActivePlayback>,
}

impl ConversationController {
    pub(crate) fn new(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        media: MediaSessionManager,
        state: StatePublisher,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config: config.conversation.clone(),
            endpoint: config.agent.endpoint(),
            connector,
            media,
            gate: SignalQualityGate::new(config.quality.clone()),
            state,
            commands,
            events_tx,
            events_rx,
            session: None,
            epoch: 0,
            pending_start: None,
            response_deadline: None,
            playback: None,
        }
    }

    /// Process events until every handle has been dropped.
    pub(crate) async fn run(mut self) {
        debug!("Conversation controller started");
        loop {
            let response_deadline = self.response_deadline;
            let playback_deadline = self.playback.as_ref().and_then(|p| p.fallback_at);

            // Order matters: an inbound message that is ready together with
            // an expired timer is applied first and disarms it.
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_internal(event).await,
                event = next_transport_event(&mut self.session) => self.handle_transport_event(event).await,
                _ = sleep_until_opt(response_deadline) => self.on_response_timeout(),
                _ = sleep_until_opt(playback_deadline) => self.finish_playback("fallback timer").await,
            }
        }

        self.teardown().await;
        debug!("Conversation controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => self.start(reply).await,
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::StartRecording { reply } => {
                let _ = reply.send(self.start_recording().await);
            }
            Command::StopRecording { reply } => self.stop_recording(reply),
            Command::Reset { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Connected { epoch, result } => self.on_connected(epoch, result),
            Internal::UtteranceProcessed {
                epoch,
                path,
                result,
                reply,
            } => {
                let outcome = self.on_utterance_processed(epoch, result).await;
                if let Some(path) = path {
                    self.media.discard(&path).await;
                }
                let _ = reply.send(outcome);
            }
            Internal::PlaybackStarted { reply_id, path } => {
                self.on_playback_started(reply_id, path).await
            }
            Internal::PlaybackFailed { reply_id, error } => {
                let fallback = self.config.playback_fallback();
                if let Some(active) = self.current_playback(reply_id) {
                    warn!(
                        "Playback failed to start: {}; returning to listening in {}ms",
                        error,
                        fallback.as_millis()
                    );
                    active.fallback_at = Some(Instant::now() + fallback);
                }
            }
            Internal::PlaybackFinished { reply_id } => {
                if self.current_playback(reply_id).is_some() {
                    self.finish_playback("completed").await;
                }
            }
            Internal::PlaybackStalled { reply_id } => {
                let grace = self.config.playback_stall_grace();
                if let Some(active) = self.current_playback(reply_id) {
                    if active.fallback_at.is_none() {
                        warn!("Playback ended without a completion signal");
                        active.fallback_at = Some(Instant::now() + grace);
                    }
                }
            }
        }
    }

    // ---- commands ----

    async fn start(&mut self, reply: oneshot::Sender<AppResult<()>>) {
        let phase = self.state.phase();
        if phase == ConversationPhase::Connecting {
            let _ = reply.send(Err(AppError::InvalidPhase {
                action: "start a conversation",
                phase,
            }));
            return;
        }
        if self.session.is_some() {
            info!("Restarting conversation; closing the current session");
            self.teardown().await;
        }

        self.epoch += 1;
        self.pending_start = Some(reply);
        self.state.update(|state| {
            state.error = None;
            state.conversation_id = None;
        });
        self.state.transition(ConversationPhase::Connecting);

        let epoch = self.epoch;
        let media = self.media.clone();
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = if media.acquire_permissions().await {
                SessionTransport::open(connector.as_ref(), &endpoint).await
            } else {
                Err(AppError::PermissionDenied)
            };
            let _ = events.send(Internal::Connected { epoch, result });
        });
    }

    async fn stop(&mut self) {
        info!("Stopping conversation");
        self.teardown().await;
        self.state.set_error(None);
        self.state.transition(ConversationPhase::Disconnected);
    }

    async fn start_recording(&mut self) -> AppResult<()> {
        let phase = self.state.phase();
        if phase != ConversationPhase::Listening {
            return Err(AppError::InvalidPhase {
                action: "start recording",
                phase,
            });
        }

        match self.media.begin_capture().await {
            Ok(()) => {
                self.state.update(|state| {
                    state.capturing = true;
                    state.error = None;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start recording: {}", e);
                self.state.set_error(Some(e.user_message()));
                Err(e)
            }
        }
    }

    /// Hand the finished capture to a task that gates and encodes it.
    ///
    /// The reply is sent once the result has been applied.
    fn stop_recording(&mut self, reply: oneshot::Sender<AppResult<()>>) {
        if self.state.snapshot().processing {
            debug!("Stop recording requested while the previous utterance is processed");
            let _ = reply.send(Ok(()));
            return;
        }
        if !self.media.is_capturing() {
            debug!("Stop recording requested with no active capture");
            let _ = reply.send(Ok(()));
            return;
        }

        self.state.update(|state| {
            state.capturing = false;
            state.processing = true;
        });

        let epoch = self.epoch;
        let media = self.media.clone();
        let gate = self.gate.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let (path, result) = match media.end_capture().await {
                Ok(Some(capture)) => {
                    let result = gate.inspect(&capture).map(|utterance| {
                        info!(
                            duration_secs = utterance.duration_secs,
                            peak = utterance.peak,
                            bytes = utterance.pcm.len(),
                            "Utterance accepted"
                        );
                        OutboundMessage::audio_chunk(encoding::encode(&utterance.pcm))
                    });
                    (Some(capture.path), result)
                }
                Ok(None) => (None, Err(AppError::Capture("no active capture".to_string()))),
                Err(e) => (None, Err(e)),
            };
            let _ = events.send(Internal::UtteranceProcessed {
                epoch,
                path,
                result,
                reply,
            });
        });
    }

    /// Escape hatch for stuck states. Never fabricates a connection.
    async fn reset(&mut self) {
        self.response_deadline = None;
        self.state.set_error(None);

        if self.session.is_some() {
            self.release_playback().await;
            self.state.transition(ConversationPhase::Listening);
        } else {
            self.teardown().await;
            self.state.transition(ConversationPhase::Disconnected);
        }
        info!(phase = %self.state.phase(), "Conversation state reset");
    }

    // ---- results of spawned work ----

    fn on_connected(&mut self, epoch: u64, result: AppResult<SessionTransport>) {
        if epoch != self.epoch {
            // Dropping a stale transport closes it.
            debug!("Discarding result of a superseded connection attempt");
            return;
        }

        let outcome = match result {
            Ok(transport) => {
                self.session = Some(ConversationSession::new(transport));
                self.state.set_error(None);
                self.state.transition(ConversationPhase::Listening);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start conversation: {}", e);
                self.state.set_error(Some(e.user_message()));
                self.state.transition(ConversationPhase::Error);
                Err(e)
            }
        };

        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(outcome);
        }
    }

    async fn on_utterance_processed(
        &mut self,
        epoch: u64,
        result: AppResult<OutboundMessage>,
    ) -> AppResult<()> {
        self.state.update(|state| state.processing = false);

        let phase = self.state.phase();
        if epoch != self.epoch || phase != ConversationPhase::Listening {
            debug!(%phase, "Dropping utterance finished outside listening");
            return Err(AppError::InvalidPhase {
                action: "send audio",
                phase,
            });
        }

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("Utterance not sent: {}", e);
                self.state.set_error(Some(e.user_message()));
                return Err(e);
            }
        };

        let session = self.session.as_ref().ok_or(AppError::InvalidPhase {
            action: "send audio",
            phase,
        })?;
        if let Err(e) = session.transport.send(message).await {
            error!("Failed to send audio: {}", e);
            self.state.set_error(Some(e.user_message()));
            return Err(e);
        }

        self.state.set_error(None);
        self.response_deadline = Some(Instant::now() + self.config.response_timeout());
        self.state.transition(ConversationPhase::WaitingForResponse);
        info!("Audio sent, waiting for response");
        Ok(())
    }

    async fn on_playback_started(&mut self, reply_id: Uuid, path: PathBuf) {
        if let Some(active) = self.current_playback(reply_id) {
            active.path = Some(path);
            return;
        }

        debug!(reply = %reply_id, "Playback started for a superseded reply");
        if self.playback.is_none() {
            if let Err(e) = self.media.stop_playback().await {
                warn!("Failed to stop stale playback: {}", e);
            }
        }
        self.media.discard(&path).await;
    }

    fn current_playback(&mut self, reply_id: Uuid) -> Option<&mut ActivePlayback> {
        self.playback
            .as_mut()
            .filter(|active| active.reply_id == reply_id)
    }

    async fn finish_playback(&mut self, how: &str) {
        if let Some(active) = self.playback.take() {
            if let Some(path) = active.path {
                self.media.discard(&path).await;
            }
        }
        if self.state.phase() == ConversationPhase::Speaking {
            info!(how, "Playback finished");
            self.state.transition(ConversationPhase::Listening);
        }
    }

    // ---- transport ----

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(message)) => self.dispatch(message).await,
            Some(TransportEvent::Closed {
                code,
                reason,
                clean: true,
            }) => {
                info!(?code, %reason, "Agent ended the conversation");
                self.teardown().await;
                self.state.transition(ConversationPhase::Disconnected);
            }
            Some(TransportEvent::Closed { code, reason, .. }) => {
                let code = code
                    .map(|c| format!("code {}", c))
                    .unwrap_or_else(|| "no close code".to_string());
                self.connection_lost(format!("connection closed abnormally ({}): {}", code, reason))
                    .await
            }
            Some(TransportEvent::Failed(reason)) => self.connection_lost(reason).await,
            None => {
                self.connection_lost("transport ended unexpectedly".to_string())
                    .await
            }
        }
    }

    async fn connection_lost(&mut self, detail: String) {
        let error = AppError::Connection(detail);
        error!("{}", error);
        self.teardown().await;
        self.state.set_error(Some(error.user_message()));
        self.state.transition(ConversationPhase::Error);
    }

    /// Apply one inbound message.
    async fn dispatch(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Audio { audio_event } => {
                self.on_agent_audio(&audio_event.audio_base_64).await
            }
            InboundMessage::UserTranscript {
                user_transcription_event,
            } => {
                match user_transcription_event.user_transcript.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => info!(transcript = %text, "User transcript"),
                    _ => warn!("Empty transcript received - audio may not have been processed correctly"),
                }
                self.disarm_response_timer("user transcript");
            }
            InboundMessage::AgentResponse {
                agent_response_event,
            } => {
                let text = agent_response_event.agent_response.unwrap_or_default();
                info!(response = %text, "Agent response");
                if looks_generic(&text) {
                    warn!("Agent gave a generic response - the utterance may not have been understood");
                }
                self.disarm_response_timer("agent response");
            }
            InboundMessage::ConversationInitiationMetadata {
                conversation_initiation_metadata_event,
            } => self.on_initiation_metadata(conversation_initiation_metadata_event),
            InboundMessage::Ping { ping_event } => {
                debug!(event_id = %ping_event.event_id, ping_ms = ?ping_event.ping_ms, "Ping answered")
            }
            InboundMessage::VadScore { vad_score_event } => {
                let score = vad_score_event.vad_score;
                if score < self.config.low_vad_score {
                    warn!(score, "Low voice activity score - speech may not be detected");
                } else {
                    debug!(score, "VAD score");
                }
            }
            InboundMessage::InternalTentativeAgentResponse {
                tentative_agent_response_internal_event,
            } => debug!(
                response = ?tentative_agent_response_internal_event.tentative_agent_response,
                "Agent is thinking"
            ),
            InboundMessage::Unknown => debug!("Ignoring unhandled agent message"),
        }
    }

    async fn on_agent_audio(&mut self, payload: &str) {
        let phase = self.state.phase();
        if !phase.is_connected() {
            debug!(%phase, "Ignoring agent audio");
            return;
        }

        let reply = match AgentAudioReply::from_base64(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Failed to decode agent audio: {}", e);
                return;
            }
        };

        self.disarm_response_timer("agent audio");
        if let Some(previous) = self.playback.take() {
            debug!(reply = %previous.reply_id, "Superseding previous reply");
            if let Some(path) = previous.path {
                self.media.discard(&path).await;
            }
        }

        info!(
            reply = %reply.id,
            bytes = reply.pcm.len(),
            duration_secs = reply.duration_secs(),
            "Agent audio received"
        );
        self.playback = Some(ActivePlayback {
            reply_id: reply.id,
            path: None,
            fallback_at: None,
        });
        self.state.set_error(None);
        self.state.transition(ConversationPhase::Speaking);

        let reply_id = reply.id;
        let media = self.media.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match media.playback(&reply).await {
                Err(error) => {
                    let _ = events.send(Internal::PlaybackFailed { reply_id, error });
                }
                Ok((path, completion)) => {
                    let _ = events.send(Internal::PlaybackStarted { reply_id, path });
                    let finished = match completion.await {
                        Ok(()) => Internal::PlaybackFinished { reply_id },
                        Err(_) => Internal::PlaybackStalled { reply_id },
                    };
                    let _ = events.send(finished);
                }
            }
        });
    }

    fn on_initiation_metadata(&mut self, event: InitiationMetadataEvent) {
        let expected = self.config.expected_audio_format.as_str();
        for (direction, format) in format_mismatches(&event, expected) {
            match format {
                Some(format) => {
                    warn!(direction, %format, %expected, "Unexpected negotiated audio format")
                }
                None => warn!(direction, %expected, "Agent did not report its audio format"),
            }
        }

        info!(conversation_id = ?event.conversation_id, "Conversation initiated");
        if let Some(session) = self.session.as_mut() {
            session.conversation_id = event.conversation_id.clone();
        }
        self.state
            .update(|state| state.conversation_id = event.conversation_id);
    }

    fn on_response_timeout(&mut self) {
        self.response_deadline = None;
        if self.state.phase() != ConversationPhase::WaitingForResponse {
            return;
        }
        warn!(
            "No response from agent within {}ms",
            self.config.response_timeout_ms
        );
        self.state.set_error(Some(AppError::NoResponse.user_message()));
        self.state.transition(ConversationPhase::Listening);
    }

    fn disarm_response_timer(&mut self, cause: &str) {
        if self.response_deadline.take().is_some() {
            debug!(cause, "Response timer cleared");
        }
    }

    // ---- teardown ----

    async fn release_playback(&mut self) {
        if let Err(e) = self.media.stop_playback().await {
            warn!("Failed to stop playback: {}", e);
        }
        if let Some(active) = self.playback.take() {
            if let Some(path) = active.path {
                self.media.discard(&path).await;
            }
        }
    }

    /// Release everything the session holds: capture, response timer,
    /// playback, then transport. Each step logs and continues on failure.
    async fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(AppError::Connection(
                "conversation stopped before it connected".to_string(),
            )));
        }

        if let Err(e) = self.media.cancel_capture().await {
            warn!("Failed to cancel capture: {}", e);
        }
        self.response_deadline = None;
        self.release_playback().await;
        if let Some(session) = self.session.take() {
            session.close();
        }

        self.state.update(|state| {
            state.capturing = false;
            state.processing = false;
            state.conversation_id = None;
        });
    }
}

/// Directions whose negotiated format is missing or differs from `expected`.
fn format_mismatches<'a>(
    event: &'a InitiationMetadataEvent,
    expected: &str,
) -> Vec<(&'static str, Option<&'a str>)> {
    [
        ("input", event.user_input_audio_format.as_deref()),
        ("output", event.agent_output_audio_format.as_deref()),
    ]
    .into_iter()
    .filter(|(_, format)| *format != Some(expected))
    .collect()
}

/// Replies the agent falls back to when it did not hear anything useful.
fn looks_generic(response: &str) -> bool {
    let lower = response.to_lowercase();
    lower.contains("how are you feeling") || lower.contains("how can i help")
}

async fn next_transport_event(session: &mut Option<ConversationSession>) -> Option<TransportEvent> {
    match session {
        Some(session) => session.transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
