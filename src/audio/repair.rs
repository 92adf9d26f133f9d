//! # WAV Repair
//!
//! Some recorders save raw PCM under a `.wav` name with no header, which
//! players refuse. These helpers rewrite such files with the canonical 44-byte
//! header at the agent's format.
//!
//! ## Key Functions:
//! - **repair_file**: re-header one file into a new path
//! - **repair_dir**: repair every `.wav` in a directory, writing `<stem><suffix>.wav`
//!   next to each input
//!
//! Files that already carry a header have it replaced rather than a second
//! one stacked on top.

use crate::audio::container;
use crate::error::{AppError, AppResult};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix appended to repaired copies when none is given.
pub const DEFAULT_SUFFIX: &str = "_fixed";

/// Rewrite `input` as a playable WAV file at `output`.
///
/// Returns the size of the written file.
pub async fn repair_file(input: &Path, output: &Path) -> AppResult<u64> {
    let bytes = tokio::fs::read(input).await?;
    if container::is_container(&bytes) {
        debug!(input = %input.display(), "File already has a RIFF header, rewriting it");
    }
    let pcm = container::unwrap(&bytes)?;
    let wav = container::wrap_agent_pcm(pcm);
    tokio::fs::write(output, &wav).await?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes = wav.len(),
        "Repaired WAV file"
    );
    Ok(wav.len() as u64)
}

/// Repair every `.wav` file directly inside `dir`.
///
/// Outputs of an earlier run (stems already ending in `suffix`) are skipped.
/// Stops at the first file that cannot be repaired. Returns the written paths
/// in name order.
pub async fn repair_dir(dir: &Path, suffix: &str) -> AppResult<Vec<PathBuf>> {
    if suffix.is_empty() {
        return Err(AppError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "repair suffix must not be empty",
        )));
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut inputs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(stem) = wav_stem(&path) else { continue };
        if stem.ends_with(suffix) || !entry.file_type().await?.is_file() {
            continue;
        }
        inputs.push(path);
    }
    inputs.sort();
    info!(dir = %dir.display(), count = inputs.len(), "Found WAV files to repair");

    let mut repaired = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = repaired_path(&input, suffix);
        repair_file(&input, &output).await?;
        repaired.push(output);
    }
    Ok(repaired)
}

/// `dir/name.wav` → `dir/name<suffix>.wav`.
pub fn repaired_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}{}.wav", stem, suffix))
}

fn wav_stem(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != "wav" {
        return None;
    }
    Some(path.file_stem()?.to_string_lossy().into_owned())
}
