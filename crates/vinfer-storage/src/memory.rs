//! In-memory cache backend.
//!
//! Used by tests and by deployments that do not need results to survive a
//! restart. Publishing swaps entry and artifact under one write lock, which
//! gives the same all-or-nothing visibility as the filesystem backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::CacheBackend;
use crate::error::{StorageError, StorageResult};
use vinfer_models::{Artifact, CacheEntry, VideoFingerprint};

#[derive(Debug, Clone)]
struct Stored {
    entry: CacheEntry,
    artifact: Option<Vec<u8>>,
}

/// Process-local cache backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<RwLock<HashMap<VideoFingerprint, Stored>>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_entry(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<CacheEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(fingerprint)
            .map(|s| s.entry.clone()))
    }

    async fn read_artifact(&self, entry: &CacheEntry) -> StorageResult<Vec<u8>> {
        let entries = self.entries.read().await;
        let stored = entries
            .get(&entry.fingerprint)
            .ok_or_else(|| StorageError::not_found(entry.fingerprint.to_string()))?;

        if stored.entry.artifact_location != entry.artifact_location {
            return Err(StorageError::not_found(format!(
                "{} (superseded)",
                entry.fingerprint
            )));
        }

        stored
            .artifact
            .clone()
            .ok_or_else(|| StorageError::not_found(entry.fingerprint.to_string()))
    }

    async fn publish_ready(
        &self,
        fingerprint: &VideoFingerprint,
        artifact: &Artifact,
    ) -> StorageResult<CacheEntry> {
        let entry = CacheEntry::ready(
            fingerprint.clone(),
            format!("memory:{}", artifact.sha256()),
            artifact.len() as u64,
            artifact.sha256(),
            artifact.content_type(),
        );

        self.entries.write().await.insert(
            fingerprint.clone(),
            Stored {
                entry: entry.clone(),
                artifact: Some(artifact.data().to_vec()),
            },
        );
        Ok(entry)
    }

    async fn write_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        self.entries.write().await.insert(
            entry.fingerprint.clone(),
            Stored {
                entry: entry.clone(),
                artifact: None,
            },
        );
        Ok(())
    }

    async fn remove(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool> {
        Ok(self.entries.write().await.remove(fingerprint).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<VideoFingerprint>> {
        let mut fingerprints: Vec<_> = self.entries.read().await.keys().cloned().collect();
        fingerprints.sort();
        Ok(fingerprints)
    }

    async fn check_writable(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata_write_drops_artifact() {
        let backend = MemoryCacheBackend::new();
        let fp = VideoFingerprint::from_digest(&[3; 32]);

        let ready = backend
            .publish_ready(&fp, &Artifact::new(b"data".to_vec()))
            .await
            .unwrap();
        backend
            .write_entry(&CacheEntry::failed(fp.clone(), "boom"))
            .await
            .unwrap();

        assert!(backend.read_artifact(&ready).await.is_err());
        assert_eq!(backend.len().await, 1);
    }
}
