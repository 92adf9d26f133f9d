//! # Transient File Storage
//!
//! Scoped create/read/delete for temporary audio files. The conversation only
//! needs those semantics plus existence/size queries; where the files live is
//! up to the implementation.

use crate::audio::buffer::FileMetadata;
use crate::error::AppResult;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage capability for capture and playback files.
#[async_trait]
pub trait TransientStorage: Send + Sync {
    /// Write `bytes` under `name`, returning the file's path.
    async fn write(&self, name: &str, bytes: &[u8]) -> AppResult<PathBuf>;

    async fn read(&self, path: &Path) -> AppResult<Vec<u8>>;

    /// Existence and size; a missing file is not an error.
    async fn metadata(&self, path: &Path) -> AppResult<FileMetadata>;

    /// Remove a file. Deleting a missing file succeeds.
    async fn delete(&self, path: &Path) -> AppResult<()>;
}

/// [`TransientStorage`] backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TransientStorage for FsStorage {
    async fn write(&self, name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(name);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote transient file");
        Ok(path)
    }

    async fn read(&self, path: &Path) -> AppResult<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn metadata(&self, path: &Path) -> AppResult<FileMetadata> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileMetadata::present(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(FileMetadata::missing()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted transient file");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
