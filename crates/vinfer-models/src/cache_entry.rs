//! Cache entry metadata.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::fingerprint::VideoFingerprint;

/// Current on-disk metadata format. Entries written with another version are
/// treated as misses and recomputed.
pub const CACHE_ENTRY_FORMAT_VERSION: u32 = 1;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Computation started but nothing has been published yet
    #[default]
    Pending,
    /// Artifact is fully written and can be served
    Ready,
    /// Last computation failed; eligible for retry
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Ready => "ready",
            EntryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata record for one fingerprint in the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    pub fingerprint: VideoFingerprint,
    pub status: EntryStatus,
    /// Backend-relative location of the artifact payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    /// Uncompressed artifact size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<u64>,
    /// Hex SHA-256 of the uncompressed artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub format_version: u32,
}

impl CacheEntry {
    /// Create a pending entry.
    pub fn pending(fingerprint: VideoFingerprint) -> Self {
        Self {
            fingerprint,
            status: EntryStatus::Pending,
            artifact_location: None,
            artifact_size: None,
            artifact_sha256: None,
            content_type: None,
            failure_reason: None,
            created_at: Utc::now(),
            format_version: CACHE_ENTRY_FORMAT_VERSION,
        }
    }

    /// Create a ready entry pointing at a published artifact.
    pub fn ready(
        fingerprint: VideoFingerprint,
        location: impl Into<String>,
        size: u64,
        sha256: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            status: EntryStatus::Ready,
            artifact_location: Some(location.into()),
            artifact_size: Some(size),
            artifact_sha256: Some(sha256.into()),
            content_type: Some(content_type.into()),
            ..Self::pending(fingerprint)
        }
    }

    /// Create a failed entry.
    pub fn failed(fingerprint: VideoFingerprint, reason: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Failed,
            failure_reason: Some(reason.into()),
            ..Self::pending(fingerprint)
        }
    }

    /// Whether this entry counts as a cache hit.
    pub fn is_hit(&self) -> bool {
        self.status == EntryStatus::Ready
            && self.artifact_location.is_some()
            && self.is_current_version()
    }

    pub fn is_current_version(&self) -> bool {
        self.format_version == CACHE_ENTRY_FORMAT_VERSION
    }

    /// Whether the entry is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.created_at + ttl <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> VideoFingerprint {
        VideoFingerprint::from_digest(&[1; 32])
    }

    #[test]
    fn test_only_ready_entries_hit() {
        assert!(!CacheEntry::pending(fp()).is_hit());
        assert!(!CacheEntry::failed(fp(), "boom").is_hit());
        assert!(CacheEntry::ready(fp(), "artifact.gz", 3, "abc", "application/json").is_hit());
    }

    #[test]
    fn test_outdated_version_is_not_a_hit() {
        let mut entry = CacheEntry::ready(fp(), "artifact.gz", 3, "abc", "application/json");
        entry.format_version = 0;
        assert!(!entry.is_hit());
    }

    #[test]
    fn test_expiry() {
        let entry = CacheEntry::failed(fp(), "boom");
        let ttl = Duration::hours(24);
        assert!(!entry.is_expired(ttl, entry.created_at + Duration::hours(1)));
        assert!(entry.is_expired(ttl, entry.created_at + Duration::hours(24)));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EntryStatus::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
    }
}
