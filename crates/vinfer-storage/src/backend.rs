//! Storage backend abstraction for the cache store.

use async_trait::async_trait;

use crate::error::StorageResult;
use vinfer_models::{Artifact, CacheEntry, VideoFingerprint};

/// Persistence layer behind [`CacheStore`](crate::CacheStore).
///
/// Implementations must make `publish_ready` atomic: a concurrent or later
/// reader observes either the previous entry or the complete new one, never
/// a Ready entry whose artifact is partially written.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Read the metadata entry for a fingerprint.
    async fn read_entry(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<CacheEntry>>;

    /// Read the uncompressed artifact referenced by a Ready entry.
    async fn read_artifact(&self, entry: &CacheEntry) -> StorageResult<Vec<u8>>;

    /// Atomically publish an artifact and its Ready entry.
    async fn publish_ready(
        &self,
        fingerprint: &VideoFingerprint,
        artifact: &Artifact,
    ) -> StorageResult<CacheEntry>;

    /// Write a metadata-only entry (Pending or Failed).
    async fn write_entry(&self, entry: &CacheEntry) -> StorageResult<()>;

    /// Remove everything stored for a fingerprint. Returns whether anything existed.
    async fn remove(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool>;

    /// Enumerate fingerprints that have stored data.
    async fn list(&self) -> StorageResult<Vec<VideoFingerprint>>;

    /// Verify the backend accepts writes.
    async fn check_writable(&self) -> StorageResult<()>;
}
