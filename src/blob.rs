//! Archival blob storage for raw lot snapshots.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppError, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the key actually written.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;
}

pub fn snapshot_key(source: &str, listing_id: &str) -> String {
    format!("snapshots/{source}/{listing_id}.json")
}

/// Blobs as files under a root directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let clean = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(AppError::Blob(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(key, bytes = bytes.len(), "Blob written");
        Ok(key.to_string())
    }
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBlobStore {
    pub blobs: dashmap::DashMap<String, Vec<u8>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::Blob("store unavailable".to_string()));
        }
        self.blobs.insert(key.to_string(), bytes);
        Ok(key.to_string())
    }
}
