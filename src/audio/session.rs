//! # Capture/Playback Session Management
//!
//! Coordinates the platform devices and transient storage for one
//! conversation: microphone permission, utterance capture, and playback of
//! agent replies.
//!
//! ## Capture Lifecycle:
//! 1. **begin_capture**: configure the microphone for 16kHz/mono/16-bit and record
//! 2. **end_capture**: stop and read back the recorded file (no-op when idle)
//! 3. **discard**: delete the file once it was sent or abandoned
//!
//! ## Playback:
//! Each reply is written to its own transient file and played through the
//! loudspeaker. The returned completion resolves when the device finishes.

use crate::audio::buffer::{AgentAudioReply, CaptureBuffer};
use crate::audio::storage::TransientStorage;
use crate::audio::AudioFormat;
use crate::device::{CaptureDevice, OutputRoute, PermissionProvider, PlaybackCompletion, PlaybackDevice};
use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Device and storage handles shared by the conversation's tasks.
///
/// Cloning is cheap; every clone drives the same devices.
#[derive(Clone)]
pub struct MediaSessionManager {
    permissions: Arc<dyn PermissionProvider>,
    capture: Arc<dyn CaptureDevice>,
    playback: Arc<dyn PlaybackDevice>,
    storage: Arc<dyn TransientStorage>,
    capturing: Arc<AtomicBool>,
}

impl MediaSessionManager {
    pub fn new(
        permissions: Arc<dyn PermissionProvider>,
        capture: Arc<dyn CaptureDevice>,
        playback: Arc<dyn PlaybackDevice>,
        storage: Arc<dyn TransientStorage>,
    ) -> Self {
        Self {
            permissions,
            capture,
            playback,
            storage,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask for microphone access. Errors count as a refusal.
    pub async fn acquire_permissions(&self) -> bool {
        match self.permissions.request_microphone().await {
            Ok(granted) => {
                if !granted {
                    warn!("Microphone permission denied");
                }
                granted
            }
            Err(e) => {
                warn!("Microphone permission request failed: {}", e);
                false
            }
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Start recording at the agent's input format.
    pub async fn begin_capture(&self) -> AppResult<()> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(AppError::CaptureStart("capture already in progress".to_string()));
        }

        match self.capture.start(AudioFormat::AGENT).await {
            Ok(()) => {
                info!("Capture started");
                Ok(())
            }
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                Err(match e {
                    AppError::CaptureStart(reason) => AppError::CaptureStart(reason),
                    other => AppError::CaptureStart(other.to_string()),
                })
            }
        }
    }

    /// Stop recording and read back what was captured.
    ///
    /// Returns `Ok(None)` when no capture is active.
    pub async fn end_capture(&self) -> AppResult<Option<CaptureBuffer>> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            debug!("end_capture called with no active capture");
            return Ok(None);
        }

        let path = self.capture.stop().await?;
        let file = self.storage.metadata(&path).await?;
        let bytes = if file.exists {
            self.storage.read(&path).await?
        } else {
            Vec::new()
        };

        info!(path = %path.display(), size = file.size, "Capture stopped");
        Ok(Some(CaptureBuffer::new(path, file, bytes)))
    }

    /// Abort an active capture without producing a buffer.
    pub async fn cancel_capture(&self) -> AppResult<()> {
        if self.capturing.swap(false, Ordering::SeqCst) {
            self.capture.cancel().await?;
            debug!("Capture cancelled");
        }
        Ok(())
    }

    /// Write a reply to its transient file and start playing it on the speaker.
    ///
    /// On failure the file is removed again and a playback error returned;
    /// the caller recovers through its fallback timer.
    pub async fn playback(&self, reply: &AgentAudioReply) -> AppResult<(PathBuf, PlaybackCompletion)> {
        let path = self.storage.write(&reply.file_name, &reply.container).await?;

        let started = async {
            self.playback.route_output(OutputRoute::Speaker).await?;
            self.playback.play(&path).await
        }
        .await;

        match started {
            Ok(completion) => {
                debug!(
                    reply = %reply.id,
                    duration_secs = reply.duration_secs(),
                    "Playback started"
                );
                Ok((path, completion))
            }
            Err(e) => {
                self.discard(&path).await;
                Err(match e {
                    AppError::Playback(reason) => AppError::Playback(reason),
                    other => AppError::Playback(other.to_string()),
                })
            }
        }
    }

    pub async fn stop_playback(&self) -> AppResult<()> {
        self.playback.stop().await
    }

    /// Delete a transient file, logging failures.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = self.storage.delete(path).await {
            warn!(path = %path.display(), "Failed to delete transient file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticPermission;
    use crate::testing::{speech_pcm, MemoryStorage, PlaybackScript, ScriptedCapture, ScriptedPlayback};
    use std::time::Duration;

    struct Fixture {
        media: MediaSessionManager,
        storage: Arc<MemoryStorage>,
        capture: Arc<ScriptedCapture>,
        playback: Arc<ScriptedPlayback>,
    }

    fn fixture(granted: bool) -> Fixture {
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
        Fixture {
            media,
            storage,
            capture,
            playback,
        }
    }

    #[tokio::test]
    async fn test_permission_result() {
        assert!(fixture(true).media.acquire_permissions().await);
        assert!(!fixture(false).media.acquire_permissions().await);
    }

    #[tokio::test]
    async fn test_capture_round_trip() {
        let f = fixture(true);
        f.capture.set_utterance(speech_pcm(32000));

        f.media.begin_capture().await.unwrap();
        assert!(f.media.is_capturing());
        assert!(matches!(
            f.media.begin_capture().await,
            Err(AppError::CaptureStart(_))
        ));

        let buffer = f.media.end_capture().await.unwrap().unwrap();
        assert!(!f.media.is_capturing());
        assert_eq!(buffer.bytes, speech_pcm(32000));
        assert_eq!(buffer.file.size, 32000);
        assert_eq!(buffer.format, AudioFormat::AGENT);

        f.media.discard(&buffer.path).await;
        assert!(!f.storage.contains(&buffer.path));
    }

    #[tokio::test]
    async fn test_end_capture_when_idle_is_noop() {
        let f = fixture(true);
        assert!(f.media.end_capture().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_capture_file_is_reported_as_missing() {
        let f = fixture(true);
        f.capture.produce_missing_file();
        f.media.begin_capture().await.unwrap();

        let buffer = f.media.end_capture().await.unwrap().unwrap();
        assert!(!buffer.file.exists);
        assert!(buffer.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_busy_device_fails_to_start() {
        let f = fixture(true);
        f.capture.fail_start();
        assert!(matches!(
            f.media.begin_capture().await,
            Err(AppError::CaptureStart(_))
        ));
        assert!(!f.media.is_capturing());
    }

    #[tokio::test]
    async fn test_cancel_capture() {
        let f = fixture(true);
        f.media.begin_capture().await.unwrap();
        f.media.cancel_capture().await.unwrap();
        assert!(!f.media.is_capturing());
        assert_eq!(f.capture.cancellations(), 1);
        assert!(f.media.end_capture().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_forces_speaker_route() {
        let f = fixture(true);
        f.playback.script(PlaybackScript::Complete(Duration::from_millis(10)));
        let reply = AgentAudioReply::from_pcm(speech_pcm(3200));

        let (path, completion) = f.media.playback(&reply).await.unwrap();
        assert_eq!(f.storage.get(&path).unwrap(), reply.container);
        assert_eq!(f.playback.routes(), vec![OutputRoute::Speaker]);
        assert_eq!(f.playback.played(), vec![reply.container.clone()]);
        completion.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_playback_removes_file() {
        let f = fixture(true);
        f.playback.script(PlaybackScript::FailToStart);
        let reply = AgentAudioReply::from_pcm(speech_pcm(3200));

        assert!(matches!(
            f.media.playback(&reply).await,
            Err(AppError::Playback(_))
        ));
        assert_eq!(f.storage.file_count(), 0);
    }
}
