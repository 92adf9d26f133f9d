//! # Platform Audio Devices
//!
//! The microphone, speaker and permission prompt are platform capabilities the
//! conversation depends on but does not implement. This module defines the
//! seams ([`PermissionProvider`], [`CaptureDevice`], [`PlaybackDevice`]) and a
//! set of headless implementations used by the command-line driver:
//!
//! - [`StaticPermission`]: grants or denies microphone access up front
//! - [`FileCaptureDevice`]: replays a WAV/PCM file as the recorded utterance
//! - [`HeadlessPlayback`]: "plays" a reply by waiting for its duration

use crate::audio::storage::TransientStorage;
use crate::audio::{container, AudioFormat};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Resolves once the device has finished playing a clip.
///
/// A dropped sender means playback ended without a completion signal.
pub type PlaybackCompletion = oneshot::Receiver<()>;

/// Where playback audio is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRoute {
    /// Loudspeaker, audible in silent mode
    Speaker,
    /// Handset earpiece
    Earpiece,
}

/// Microphone permission prompt.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request_microphone(&self) -> AppResult<bool>;
}

/// Microphone recording into a transient file.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Configure the device for `format` and start recording.
    async fn start(&self, format: AudioFormat) -> AppResult<()>;

    /// Stop recording and return the path of the recorded file.
    async fn stop(&self) -> AppResult<PathBuf>;

    /// Abort a recording without producing a file.
    async fn cancel(&self) -> AppResult<()>;
}

/// Speaker output.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    async fn route_output(&self, route: OutputRoute) -> AppResult<()>;

    /// Start playing the file at `path`, replacing anything already playing.
    async fn play(&self, path: &Path) -> AppResult<PlaybackCompletion>;

    async fn stop(&self) -> AppResult<()>;
}

/// Permission provider with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission {
    granted: bool,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

#[async_trait]
impl PermissionProvider for StaticPermission {
    async fn request_microphone(&self) -> AppResult<bool> {
        Ok(self.granted)
    }
}

/// Active recording on a [`FileCaptureDevice`].
#[derive(Debug)]
struct Recording {
    started_at: Instant,
}

/// Capture device that replays a file from disk as each utterance.
///
/// Useful for driving a conversation without a microphone: every
/// start/stop pair copies the source file into transient storage.
pub struct FileCaptureDevice {
    source: PathBuf,
    storage: Arc<dyn TransientStorage>,
    recording: Mutex<Option<Recording>>,
}

impl FileCaptureDevice {
    pub fn new(source: impl Into<PathBuf>, storage: Arc<dyn TransientStorage>) -> Self {
        Self {
            source: source.into(),
            storage,
            recording: Mutex::new(None),
        }
    }

    fn take_recording(&self) -> Option<Recording> {
        self.recording.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    async fn start(&self, format: AudioFormat) -> AppResult<()> {
        if format != AudioFormat::AGENT {
            return Err(AppError::CaptureStart(format!(
                "unsupported capture format {:?}",
                format
            )));
        }

        if !tokio::fs::try_exists(&self.source).await.unwrap_or(false) {
            return Err(AppError::CaptureStart(format!(
                "capture source {} not found",
                self.source.display()
            )));
        }

        let mut slot = self
            .recording
            .lock()
            .map_err(|_| AppError::CaptureStart("capture device unavailable".to_string()))?;
        if slot.is_some() {
            return Err(AppError::CaptureStart("capture device busy".to_string()));
        }
        *slot = Some(Recording {
            started_at: Instant::now(),
        });

        info!(source = %self.source.display(), "Recording started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<PathBuf> {
        let recording = self
            .take_recording()
            .ok_or_else(|| AppError::Capture("capture device is not recording".to_string()))?;

        let bytes = tokio::fs::read(&self.source)
            .await
            .map_err(|e| AppError::Capture(format!("failed to read capture source: {}", e)))?;
        let name = format!("capture_{}.wav", Uuid::new_v4().simple());
        let path = self.storage.write(&name, &bytes).await?;

        debug!(
            elapsed_ms = recording.started_at.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "Recording stopped"
        );
        Ok(path)
    }

    async fn cancel(&self) -> AppResult<()> {
        if self.take_recording().is_some() {
            debug!("Recording cancelled");
        }
        Ok(())
    }
}

/// Playback device with no audio output.
///
/// Reads the WAV container, computes its duration and signals completion
/// once that much time has passed.
pub struct HeadlessPlayback {
    storage: Arc<dyn TransientStorage>,
    route: Mutex<OutputRoute>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl HeadlessPlayback {
    pub fn new(storage: Arc<dyn TransientStorage>) -> Self {
        Self {
            storage,
            route: Mutex::new(OutputRoute::Earpiece),
            current: Mutex::new(None),
        }
    }

    fn replace_current(&self, next: Option<JoinHandle<()>>) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = std::mem::replace(&mut *current, next) {
                previous.abort();
            }
        }
    }
}

#[async_trait]
impl PlaybackDevice for HeadlessPlayback {
    async fn route_output(&self, route: OutputRoute) -> AppResult<()> {
        let mut current = self
            .route
            .lock()
            .map_err(|_| AppError::Playback("output route unavailable".to_string()))?;
        *current = route;
        Ok(())
    }

    async fn play(&self, path: &Path) -> AppResult<PlaybackCompletion> {
        let bytes = self.storage.read(path).await?;
        let pcm = container::unwrap(&bytes)?;
        let duration = Duration::from_secs_f64(AudioFormat::AGENT.duration_secs(pcm.len() as u64));

        let route = self.route.lock().map(|r| *r).unwrap_or(OutputRoute::Earpiece);
        if route != OutputRoute::Speaker {
            warn!(?route, "Playing through non-speaker route");
        }
        info!(path = %path.display(), duration_ms = duration.as_millis() as u64, "Playing agent audio");

        let (done_tx, done_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = done_tx.send(());
        });
        self.replace_current(Some(task));
        Ok(done_rx)
    }

    async fn stop(&self) -> AppResult<()> {
        self.replace_current(None);
        Ok(())
    }
}
