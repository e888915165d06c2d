//! Cache store: the authoritative record of computed artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::CacheBackend;
use crate::error::{StorageError, StorageResult};
use crate::fs::FsCacheBackend;
use crate::memory::MemoryCacheBackend;
use vinfer_models::{sha256_hex, Artifact, CacheEntry, EntryStatus, VideoFingerprint};

/// Cache store over an injected backend.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    ttl: Option<chrono::Duration>,
}

impl CacheStore {
    /// Create a store over a backend with no expiry.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend, ttl: None }
    }

    /// Filesystem-backed store rooted at `root`.
    pub fn filesystem(root: impl Into<PathBuf>) -> StorageResult<Self> {
        Ok(Self::new(Arc::new(FsCacheBackend::new(root)?)))
    }

    /// Process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()))
    }

    /// Expire entries older than `ttl`. `None` keeps entries forever.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.and_then(|d| chrono::Duration::from_std(d).ok());
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Latest committed entry for a fingerprint.
    pub async fn lookup(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<CacheEntry>> {
        self.backend.read_entry(fingerprint).await
    }

    /// Load the artifact for a fingerprint if it is a valid cache hit.
    ///
    /// Returns `Ok(None)` on a miss. Corrupt, truncated, outdated or expired
    /// entries are misses too; only unreachable storage is an error.
    pub async fn load_ready(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<Artifact>> {
        let entry = match self.backend.read_entry(fingerprint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(fingerprint = %fingerprint, "Cache MISS");
                return Ok(None);
            }
            Err(e) if e.is_corruption() => {
                warn!(fingerprint = %fingerprint, error = %e, "Unreadable cache entry, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !entry.is_hit() {
            debug!(fingerprint = %fingerprint, status = %entry.status, "Cache MISS (not ready)");
            return Ok(None);
        }

        if self.is_expired(&entry, Utc::now()) {
            debug!(fingerprint = %fingerprint, created_at = %entry.created_at, "Cache MISS (expired)");
            return Ok(None);
        }

        let data = match self.backend.read_artifact(&entry).await {
            Ok(data) => data,
            Err(e) if e.is_corruption() || matches!(e, StorageError::NotFound(_)) => {
                warn!(fingerprint = %fingerprint, error = %e, "Ready entry has unusable artifact, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(expected) = entry.artifact_sha256.as_deref() {
            let actual = sha256_hex(&data);
            if actual != expected {
                warn!(
                    fingerprint = %fingerprint,
                    expected = %expected,
                    actual = %actual,
                    "Artifact digest mismatch, treating as miss"
                );
                return Ok(None);
            }
        }

        let content_type = entry
            .content_type
            .unwrap_or_else(|| vinfer_models::DEFAULT_ARTIFACT_CONTENT_TYPE.to_string());

        info!(fingerprint = %fingerprint, size = data.len(), "Cache HIT");
        Ok(Some(Artifact::with_content_type(data, content_type)))
    }

    /// Atomically publish an artifact as the Ready entry for a fingerprint.
    pub async fn commit(
        &self,
        fingerprint: &VideoFingerprint,
        artifact: &Artifact,
    ) -> StorageResult<CacheEntry> {
        let entry = self.backend.publish_ready(fingerprint, artifact).await?;
        info!(
            fingerprint = %fingerprint,
            size = artifact.len(),
            sha256 = %artifact.sha256(),
            "Artifact committed to cache"
        );
        Ok(entry)
    }

    /// Record that a computation has started.
    ///
    /// A Ready entry is left untouched.
    pub async fn mark_pending(&self, fingerprint: &VideoFingerprint) -> StorageResult<CacheEntry> {
        if let Some(existing) = self.existing_hit(fingerprint).await {
            return Ok(existing);
        }
        let entry = CacheEntry::pending(fingerprint.clone());
        self.backend.write_entry(&entry).await?;
        Ok(entry)
    }

    /// Record a failed computation. Failed entries are never cache hits.
    ///
    /// A Ready entry is left untouched.
    pub async fn mark_failed(
        &self,
        fingerprint: &VideoFingerprint,
        reason: &str,
    ) -> StorageResult<CacheEntry> {
        if let Some(existing) = self.existing_hit(fingerprint).await {
            debug!(fingerprint = %fingerprint, "Keeping Ready entry instead of marking failed");
            return Ok(existing);
        }
        let entry = CacheEntry::failed(fingerprint.clone(), reason);
        self.backend.write_entry(&entry).await?;
        warn!(fingerprint = %fingerprint, reason = %reason, "Cache entry marked failed");
        Ok(entry)
    }

    /// Remove an entry. Returns whether anything was removed.
    pub async fn evict(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool> {
        let removed = self.backend.remove(fingerprint).await?;
        if removed {
            info!(fingerprint = %fingerprint, "Cache entry evicted");
        }
        Ok(removed)
    }

    /// Evict expired, failed, outdated and unreadable entries.
    ///
    /// Failed entries are always removed; other entries only once the TTL has
    /// elapsed. An entry that cannot be read or removed is skipped. Returns the
    /// number of evicted entries.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut evicted = 0;

        for fingerprint in self.backend.list().await? {
            let stale = match self.backend.read_entry(&fingerprint).await {
                Ok(Some(entry)) => {
                    entry.status == EntryStatus::Failed
                        || !entry.is_current_version()
                        || self.is_expired(&entry, now)
                }
                // Directory without metadata: leftovers from an interrupted write.
                Ok(None) => true,
                Err(e) if e.is_corruption() => true,
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Skipping entry during sweep");
                    false
                }
            };

            if !stale {
                continue;
            }
            match self.backend.remove(&fingerprint).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Failed to evict entry during sweep");
                }
            }
        }

        if evicted > 0 {
            info!(evicted = evicted, "Cache sweep evicted stale entries");
        }
        Ok(evicted)
    }

    /// Fingerprints with stored data.
    pub async fn list(&self) -> StorageResult<Vec<VideoFingerprint>> {
        self.backend.list().await
    }

    pub async fn check_writable(&self) -> StorageResult<()> {
        self.backend.check_writable().await
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| entry.is_expired(ttl, now))
    }

    async fn existing_hit(&self, fingerprint: &VideoFingerprint) -> Option<CacheEntry> {
        match self.backend.read_entry(fingerprint).await {
            Ok(Some(entry)) if entry.is_hit() => Some(entry),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Memory backend that refuses to remove one fingerprint.
    struct StuckBackend {
        inner: MemoryCacheBackend,
        stuck: VideoFingerprint,
    }

    #[async_trait]
    impl CacheBackend for StuckBackend {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn read_entry(
            &self,
            fingerprint: &VideoFingerprint,
        ) -> StorageResult<Option<CacheEntry>> {
            self.inner.read_entry(fingerprint).await
        }

        async fn read_artifact(&self, entry: &CacheEntry) -> StorageResult<Vec<u8>> {
            self.inner.read_artifact(entry).await
        }

        async fn publish_ready(
            &self,
            fingerprint: &VideoFingerprint,
            artifact: &Artifact,
        ) -> StorageResult<CacheEntry> {
            self.inner.publish_ready(fingerprint, artifact).await
        }

        async fn write_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
            self.inner.write_entry(entry).await
        }

        async fn remove(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool> {
            if *fingerprint == self.stuck {
                return Err(StorageError::delete_failed("permission denied"));
            }
            self.inner.remove(fingerprint).await
        }

        async fn list(&self) -> StorageResult<Vec<VideoFingerprint>> {
            self.inner.list().await
        }

        async fn check_writable(&self) -> StorageResult<()> {
            self.inner.check_writable().await
        }
    }

    fn fp(byte: u8) -> VideoFingerprint {
        VideoFingerprint::from_digest(&[byte; 32])
    }

    #[tokio::test]
    async fn test_failed_entry_is_not_a_hit() {
        let store = CacheStore::in_memory();
        store.mark_failed(&fp(1), "pipeline crashed").await.unwrap();

        let entry = store.lookup(&fp(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(store.load_ready(&fp(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_ready_entry() {
        let store = CacheStore::in_memory();
        let artifact = Artifact::new(b"result".to_vec());
        store.commit(&fp(2), &artifact).await.unwrap();

        let entry = store.mark_failed(&fp(2), "late failure").await.unwrap();
        assert_eq!(entry.status, EntryStatus::Ready);
        assert_eq!(store.load_ready(&fp(2)).await.unwrap(), Some(artifact));
    }

    #[tokio::test]
    async fn test_sweep_removes_failed_and_expired() {
        let store = CacheStore::in_memory().with_ttl(Some(Duration::from_secs(3600)));
        store.commit(&fp(3), &Artifact::new(b"fresh".to_vec())).await.unwrap();
        store.mark_failed(&fp(4), "boom").await.unwrap();

        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.lookup(&fp(4)).await.unwrap().is_none());
        assert!(store.lookup(&fp(3)).await.unwrap().is_some());

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(store.sweep_expired(later).await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_ttl_keeps_ready_entries() {
        let store = CacheStore::in_memory();
        store.commit(&fp(5), &Artifact::new(b"keep".to_vec())).await.unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(store.sweep_expired(far_future).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_undeletable_entry() {
        let store = CacheStore::new(Arc::new(StuckBackend {
            inner: MemoryCacheBackend::new(),
            stuck: fp(7),
        }));
        for byte in 6..=8 {
            store.mark_failed(&fp(byte), "boom").await.unwrap();
        }

        assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 2);
        assert_eq!(store.list().await.unwrap(), vec![fp(7)]);
    }
}
