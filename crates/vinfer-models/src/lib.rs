//! Shared data models for the vinfer inference cache.
//!
//! This crate provides Serde-serializable types for:
//! - Video fingerprints and processing parameters
//! - Cache entries and their lifecycle status
//! - Inference artifacts
//! - Processing state reported to clients

pub mod artifact;
pub mod cache_entry;
pub mod fingerprint;
pub mod params;
pub mod state;

// Re-export common types
pub use artifact::{sha256_hex, Artifact, DEFAULT_ARTIFACT_CONTENT_TYPE};
pub use cache_entry::{CacheEntry, EntryStatus, CACHE_ENTRY_FORMAT_VERSION};
pub use fingerprint::{FingerprintError, VideoFingerprint, FINGERPRINT_HEX_LEN};
pub use params::ProcessingParams;
pub use state::ProcessingState;
