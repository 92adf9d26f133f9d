//! Test doubles shared by the unit tests: PCM generators, in-memory storage,
//! scripted devices and a channel-backed connector standing in for the agent.

use crate::audio::buffer::FileMetadata;
use crate::audio::session::MediaSessionManager;
use crate::audio::storage::TransientStorage;
use crate::audio::AudioFormat;
use crate::config::{AgentEndpoint, AppConfig};
use crate::conversation::ConversationHandle;
use crate::device::{
    CaptureDevice, OutputRoute, PlaybackCompletion, PlaybackDevice, StaticPermission,
};
use crate::error::{AppError, AppResult};
use crate::protocol::InboundMessage;
use crate::transport::{Connector, OutboundFrame, TransportEvent, TransportLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// `n_bytes` of a loud 440 Hz sine at the agent format.
pub fn speech_pcm(n_bytes: usize) -> Vec<u8> {
    let rate = AudioFormat::AGENT.sample_rate as f64;
    let mut pcm: Vec<u8> = (0..n_bytes.div_ceil(2))
        .flat_map(|i| {
            let phase = 2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate;
            ((phase.sin() * 8000.0) as i16).to_le_bytes()
        })
        .collect();
    pcm.truncate(n_bytes);
    pcm
}

/// `n_bytes` of samples alternating between `+amplitude` and `-amplitude`.
pub fn tone_pcm(n_bytes: usize, amplitude: i16) -> Vec<u8> {
    let mut pcm: Vec<u8> = (0..n_bytes.div_ceil(2))
        .flat_map(|i| {
            let sample = if i % 2 == 0 { amplitude } else { -amplitude };
            sample.to_le_bytes()
        })
        .collect();
    pcm.truncate(n_bytes);
    pcm
}

/// [`TransientStorage`] kept in a map.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl TransientStorage for MemoryStorage {
    async fn write(&self, name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let path = PathBuf::from("/transient").join(name);
        self.files.lock().unwrap().insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn read(&self, path: &Path) -> AppResult<Vec<u8>> {
        self.get(path).ok_or_else(|| {
            AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.display().to_string(),
            ))
        })
    }

    async fn metadata(&self, path: &Path) -> AppResult<FileMetadata> {
        Ok(self
            .get(path)
            .map(|bytes| FileMetadata::present(bytes.len() as u64))
            .unwrap_or_else(FileMetadata::missing))
    }

    async fn delete(&self, path: &Path) -> AppResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Capture device that "records" a preset utterance.
pub struct ScriptedCapture {
    storage: Arc<MemoryStorage>,
    utterance: Mutex<Vec<u8>>,
    missing: AtomicBool,
    busy: AtomicBool,
    cancel_fails: AtomicBool,
    recordings: AtomicUsize,
    cancellations: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            utterance: Mutex::new(speech_pcm(48000)),
            missing: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            cancel_fails: AtomicBool::new(false),
            recordings: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
        }
    }

    pub fn set_utterance(&self, bytes: Vec<u8>) {
        *self.utterance.lock().unwrap() = bytes;
    }

    /// Report a path on stop without writing anything there.
    pub fn produce_missing_file(&self) {
        self.missing.store(true, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self) {
        self.cancel_fails.store(true, Ordering::SeqCst);
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn start(&self, _format: AudioFormat) -> AppResult<()> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(AppError::CaptureStart("device busy".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> AppResult<PathBuf> {
        let n = self.recordings.fetch_add(1, Ordering::SeqCst);
        let name = format!("capture_{}.wav", n);
        if self.missing.load(Ordering::SeqCst) {
            return Ok(PathBuf::from("/transient").join(name));
        }
        let bytes = self.utterance.lock().unwrap().clone();
        self.storage.write(&name, &bytes).await
    }

    async fn cancel(&self) -> AppResult<()> {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(AppError::Capture("device stopped responding".to_string()));
        }
        Ok(())
    }
}

/// How [`ScriptedPlayback`] behaves on the next `play`.
#[derive(Debug, Clone, Copy)]
pub enum PlaybackScript {
    /// Signal completion after the given time
    Complete(Duration),
    /// Never signal completion
    Hold,
    /// Drop the completion signal immediately
    DropSignal,
    /// Refuse to start
    FailToStart,
}

/// Playback device that records what it was asked to do.
pub struct ScriptedPlayback {
    storage: Arc<MemoryStorage>,
    script: Mutex<PlaybackScript>,
    routes: Mutex<Vec<OutputRoute>>,
    played: Mutex<Vec<Vec<u8>>>,
    held: Mutex<Vec<oneshot::Sender<()>>>,
    stop_fails: AtomicBool,
    stops: AtomicUsize,
}

impl ScriptedPlayback {
    pub fn new(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            script: Mutex::new(PlaybackScript::Complete(Duration::from_secs(1))),
            routes: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            stop_fails: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, script: PlaybackScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn routes(&self) -> Vec<OutputRoute> {
        self.routes.lock().unwrap().clone()
    }

    /// Container bytes of every clip played so far.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    pub fn fail_stop(&self) {
        self.stop_fails.store(true, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackDevice for ScriptedPlayback {
    async fn route_output(&self, route: OutputRoute) -> AppResult<()> {
        self.routes.lock().unwrap().push(route);
        Ok(())
    }

    async fn play(&self, path: &Path) -> AppResult<PlaybackCompletion> {
        let script = *self.script.lock().unwrap();
        if let PlaybackScript::FailToStart = script {
            return Err(AppError::Playback("output device unavailable".to_string()));
        }

        let bytes = self.storage.read(path).await?;
        self.played.lock().unwrap().push(bytes);

        let (done_tx, done_rx) = oneshot::channel();
        match script {
            PlaybackScript::Complete(after) => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = done_tx.send(());
                });
            }
            PlaybackScript::Hold => self.held.lock().unwrap().push(done_tx),
            PlaybackScript::DropSignal | PlaybackScript::FailToStart => drop(done_tx),
        }
        Ok(done_rx)
    }

    async fn stop(&self) -> AppResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(AppError::Playback("output device lost".to_string()));
        }
        Ok(())
    }
}

/// The agent's side of one in-memory connection.
pub struct RemoteAgent {
    pub sent: mpsc::Receiver<OutboundFrame>,
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl RemoteAgent {
    /// Deliver a JSON message as the agent would.
    pub async fn push(&self, json: &str) {
        let message = InboundMessage::parse(json).unwrap();
        self.inbound
            .send(TransportEvent::Message(message))
            .await
            .unwrap();
    }

    pub async fn close(&self, code: u16) {
        let _ = self
            .inbound
            .send(TransportEvent::closed(Some(code), "remote close"))
            .await;
    }

    pub async fn fail(&self, reason: &str) {
        let _ = self
            .inbound
            .send(TransportEvent::Failed(reason.to_string()))
            .await;
    }

    /// Every frame written so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Connector that hands each new connection's far end to the test.
pub struct ChannelConnector {
    refuse: AtomicBool,
    delay: Mutex<Option<Duration>>,
    remotes: mpsc::UnboundedSender<RemoteAgent>,
    endpoints: Mutex<Vec<AgentEndpoint>>,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteAgent>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        let connector = Self {
            refuse: AtomicBool::new(false),
            delay: Mutex::new(None),
            remotes,
            endpoints: Mutex::new(Vec::new()),
        };
        (Arc::new(connector), remote_rx)
    }

    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn delay(&self, by: Duration) {
        *self.delay.lock().unwrap() = Some(by);
    }

    pub fn endpoints(&self) -> Vec<AgentEndpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, endpoint: &AgentEndpoint) -> AppResult<TransportLink> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(AppError::Connection("connection refused".to_string()));
        }
        endpoint.url()?;

        let (out_tx, out_rx) = mpsc::channel(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        let _ = self.remotes.send(RemoteAgent {
            sent: out_rx,
            inbound: in_tx,
        });
        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// A conversation wired to scripted devices and an in-memory agent.
pub struct Harness {
    pub handle: ConversationHandle,
    pub storage: Arc<MemoryStorage>,
    pub capture: Arc<ScriptedCapture>,
    pub playback: Arc<ScriptedPlayback>,
    pub connector: Arc<ChannelConnector>,
    pub remotes: mpsc::UnboundedReceiver<RemoteAgent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_permission(true)
    }

    pub fn with_permission(granted: bool) -> Self {
        let mut config = AppConfig::default();
        config.agent.agent_id = "test-agent".to_string();

        let storage = Arc::new(MemoryStorage::default());
        let capture = Arc::new(ScriptedCapture::new(storage.clone()));
        let playback = Arc::new(ScriptedPlayback::new(storage.clone()));
        let permission = if granted {
            StaticPermission::granted()
        } else {
            StaticPermission::denied()
        };
        let media = MediaSessionManager::new(
            Arc::new(permission),
            capture.clone(),
            playback.clone(),
            storage.clone(),
        );
        let (connector, remotes) = ChannelConnector::new();
        let handle = ConversationHandle::spawn(&config, connector.clone(), media);

        Self {
            handle,
            storage,
            capture,
            playback,
            connector,
            remotes,
        }
    }

    /// Start a conversation and return the agent's end of it.
    pub async fn connect(&mut self) -> RemoteAgent {
        self.handle.start_conversation().await.unwrap();
        self.remotes.recv().await.unwrap()
    }
}
