//! Cloneable command surface for the UI layer.

use crate::audio::session::MediaSessionManager;
use crate::config::AppConfig;
use crate::conversation::controller::{Command, ConversationController};
use crate::error::{AppError, AppResult};
use crate::state::{ConversationState, PhaseTransition, StateObserver, StatePublisher};
use crate::transport::Connector;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;

/// Commands queued before callers start waiting for the controller.
const COMMAND_BUFFER: usize = 32;

/// Handle to a running conversation controller.
///
/// All clones talk to the same conversation. The controller shuts down,
/// releasing devices and closing the transport, once every handle is dropped.
#[derive(Clone)]
pub struct ConversationHandle {
    commands: mpsc::Sender<Command>,
    observer: StateObserver,
}

impl ConversationHandle {
    /// Spawn the controller task on the current runtime.
    pub fn spawn(
        config: &AppConfig,
        connector: Arc<dyn Connector>,
        media: MediaSessionManager,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let state = StatePublisher::new();
        let observer = state.observer();

        let controller = ConversationController::new(config, connector, media, state, command_rx);
        tokio::spawn(controller.run());

        Self { commands, observer }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AppError::ControllerGone)?;
        response.await.map_err(|_| AppError::ControllerGone)
    }

    /// Acquire the microphone and connect. Resolves once connected or failed.
    pub async fn start_conversation(&self) -> AppResult<()> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Tear the session down. Always permitted.
    pub async fn stop_conversation(&self) -> AppResult<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn start_recording(&self) -> AppResult<()> {
        self.request(|reply| Command::StartRecording { reply }).await?
    }

    /// Stop recording and send the utterance if it passes the quality gate.
    ///
    /// Resolves after the utterance was sent or rejected.
    pub async fn stop_recording(&self) -> AppResult<()> {
        self.request(|reply| Command::StopRecording { reply }).await?
    }

    /// Force `listening` when connected, `disconnected` otherwise.
    pub async fn reset_conversation_state(&self) -> AppResult<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub fn state(&self) -> ConversationState {
        self.observer.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ConversationState> {
        self.observer.watch()
    }

    pub fn state_stream(&self) -> WatchStream<ConversationState> {
        WatchStream::new(self.observer.watch())
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.observer.subscribe_transitions()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&ConversationState) -> bool,
    ) -> AppResult<ConversationState> {
        let mut state = self.observer.watch();
        let matched = state
            .wait_for(predicate)
            .await
            .map_err(|_| AppError::ControllerGone)?;
        Ok(matched.clone())
    }
}
