//! Artifact blob storage
//!
//! Artifacts are write-once blobs keyed by `{owner_id}/{task_id}/{work_id}.txt`.
//! The store trait is object-safe so embedders can supply their own backend;
//! [`FsBlobStore`] is the bundled filesystem implementation. Expiry is handled
//! by the pipeline's background reaper, not by the store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::error::BlobError;
use crate::types::TaskId;

/// Build the canonical artifact key for a task
pub fn artifact_key(owner_id: &str, task_id: TaskId, work_id: &str) -> String {
    format!("{owner_id}/{task_id}/{work_id}.txt")
}

/// Hex-encoded SHA-256 digest of artifact content
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Write-once artifact persistence
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a new artifact under `key`
    ///
    /// Fails with [`BlobError::AlreadyExists`] when the key is taken; callers
    /// treat that as losing the completion race (or as their own prior
    /// attempt's write) and never overwrite.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;

    /// Fetch an artifact
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove an artifact; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Whether an artifact exists under the key
    async fn exists(&self, key: &str) -> Result<bool, BlobError>;
}

/// Filesystem-backed blob store rooted at a directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key to a path under the root, rejecting traversal
    fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let invalid = || BlobError::InvalidKey { key: key.into() };

        if key.is_empty() {
            return Err(invalid());
        }
        let rel = Path::new(key);
        if rel.is_absolute() {
            return Err(invalid());
        }
        for component in rel.components() {
            match component {
                Component::Normal(part) if !part.is_empty() => {}
                _ => return Err(invalid()),
            }
        }
        Ok(self.root.join(rel))
    }

    fn io_err(key: &str, source: std::io::Error) -> BlobError {
        BlobError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.resolve(key)?;

        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Self::io_err(key, e))?
        {
            return Err(BlobError::AlreadyExists { key: key.into() });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_err(key, e))?;
        }

        // Stage in a temp file and rename so a crashed writer never leaves a
        // partial artifact under the final key
        let tmp = self
            .root
            .join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Self::io_err(key, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::io_err(key, e));
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound { key: key.into() })
            }
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.resolve(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Self::io_err(key, e))
    }
}
