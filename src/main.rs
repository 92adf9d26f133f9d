//! # Agent Voice Client - Command-Line Driver
//!
//! Runs one voice conversation from the terminal using the headless devices:
//! the "microphone" replays a configured WAV file and playback waits for
//! each reply's duration.
//!
//! ## Commands (one per line on stdin):
//! - `start`: acquire the microphone and connect to the agent
//! - `record`: start capturing an utterance
//! - `send`: stop capturing and send the utterance
//! - `reset`: recover from a stuck state
//! - `status`: print the UI flags as JSON
//! - `repair <path> [suffix]`: add WAV headers to a headerless file or to every
//!   `.wav` in a directory, writing `<name><suffix>.wav` (default `_fixed`)
//! - `stop`: end the conversation
//! - `quit`: stop and exit

use agent_voice_client::audio::repair;
use agent_voice_client::audio::session::MediaSessionManager;
use agent_voice_client::audio::storage::{FsStorage, TransientStorage};
use agent_voice_client::device::{FileCaptureDevice, HeadlessPlayback, StaticPermission};
use agent_voice_client::websocket::WebSocketConnector;
use agent_voice_client::{AppConfig, AppResult, ConversationHandle};
use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## What this function does:
/// 1. **Loads configuration** from config.toml, `.env` and environment variables
/// 2. **Sets up logging**
/// 3. **Wires the headless devices** and spawns the conversation controller
/// 4. **Reads commands** from stdin until `quit`, end of input or a shutdown signal
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting agent-voice-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        endpoint = %config.agent.endpoint,
        capture_source = %config.device.capture_source.display(),
        transient_dir = %config.storage.transient_dir.display(),
        "Configuration loaded"
    );
    if config.agent.agent_id.trim().is_empty() {
        warn!("No agent id configured; set ELEVENLABS_AGENT_ID before starting a conversation");
    }

    let handle = build_conversation(&config);
    spawn_state_logger(&handle);
    setup_signal_handlers();

    println!("Commands: start, record, send, reset, status, repair <path> [suffix], stop, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }
        };

        let Some(line) = line else { break };
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            command => {
                match run_command(&handle, command).await {
                    Ok(()) => {}
                    Err(e) if e.is_recoverable() => warn!("{} failed: {}", command, e),
                    Err(e) => error!("{} failed: {}", command, e),
                }
            }
        }
    }

    handle.stop_conversation().await?;
    info!("Conversation client stopped");
    Ok(())
}

fn build_conversation(config: &AppConfig) -> ConversationHandle {
    let storage: Arc<dyn TransientStorage> =
        Arc::new(FsStorage::new(config.storage.transient_dir.clone()));
    let permission = if config.device.microphone_granted {
        StaticPermission::granted()
    } else {
        StaticPermission::denied()
    };

    let media = MediaSessionManager::new(
        Arc::new(permission),
        Arc::new(FileCaptureDevice::new(
            config.device.capture_source.clone(),
            storage.clone(),
        )),
        Arc::new(HeadlessPlayback::new(storage.clone())),
        storage,
    );
    let connector = Arc::new(WebSocketConnector::new(config.agent.handshake_timeout()));

    ConversationHandle::spawn(config, connector, media)
}

async fn run_command(handle: &ConversationHandle, command: &str) -> AppResult<()> {
    let mut words = command.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(());
    };

    match verb {
        "start" => handle.start_conversation().await,
        "record" => handle.start_recording().await,
        "send" => handle.stop_recording().await,
        "reset" => handle.reset_conversation_state().await,
        "stop" => handle.stop_conversation().await,
        "status" => {
            println!("{}", serde_json::to_string_pretty(&handle.state().flags())?);
            Ok(())
        }
        "repair" => match words.next() {
            Some(path) => {
                let suffix = words.next().unwrap_or(repair::DEFAULT_SUFFIX);
                repair_wav(Path::new(path), suffix).await
            }
            None => {
                println!("Usage: repair <file-or-directory> [suffix]");
                Ok(())
            }
        },
        other => {
            println!("Unknown command '{}'", other);
            Ok(())
        }
    }
}

/// Repair one file, or every `.wav` in a directory.
async fn repair_wav(path: &Path, suffix: &str) -> AppResult<()> {
    if tokio::fs::metadata(path).await?.is_dir() {
        let repaired = repair::repair_dir(path, suffix).await?;
        println!("Repaired {} file(s)", repaired.len());
        for output in repaired {
            println!("  {}", output.display());
        }
    } else {
        let output = repair::repaired_path(path, suffix);
        let bytes = repair::repair_file(path, &output).await?;
        println!("Repaired {} ({} bytes)", output.display(), bytes);
    }
    Ok(())
}

/// Log every published state change.
fn spawn_state_logger(handle: &ConversationHandle) {
    let mut states = handle.state_stream();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            match &state.error {
                Some(reason) => warn!(phase = %state.phase, %reason, "Conversation state"),
                None => info!(phase = %state.phase, recording = state.capturing, "Conversation state"),
            }
        }
    });
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "agent_voice_client=trace")
/// - If not set, defaults to "agent_voice_client=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_voice_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Set the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let signals = (
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()),
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()),
        );
        let (mut sigterm, mut sigint) = match signals {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
