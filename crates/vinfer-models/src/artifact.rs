//! Inference artifact.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Default content type for pipeline output.
pub const DEFAULT_ARTIFACT_CONTENT_TYPE: &str = "application/octet-stream";

/// Opaque output of the inference pipeline.
///
/// The payload sits behind an `Arc` so every waiter deduplicated onto the
/// same computation receives a reference to the same bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    data: Arc<[u8]>,
    content_type: String,
    sha256: String,
}

impl Artifact {
    /// Wrap pipeline output bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self::with_content_type(data, DEFAULT_ARTIFACT_CONTENT_TYPE)
    }

    pub fn with_content_type(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        let data: Vec<u8> = data.into();
        let sha256 = sha256_hex(&data);
        Self {
            data: Arc::from(data),
            content_type: content_type.into(),
            sha256,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Hex SHA-256 of the payload.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// True when both artifacts share the same underlying buffer.
    pub fn shares_buffer(&self, other: &Artifact) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.data.len())
            .field("content_type", &self.content_type)
            .field("sha256", &self.sha256)
            .finish()
    }
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_known_value() {
        let artifact = Artifact::new(b"abc".to_vec());
        assert_eq!(
            artifact.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(artifact.content_type(), DEFAULT_ARTIFACT_CONTENT_TYPE);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let a = Artifact::new(vec![1, 2, 3]);
        let b = a.clone();
        assert!(a.shares_buffer(&b));

        let c = Artifact::new(vec![1, 2, 3]);
        assert_eq!(a, c);
        assert!(!a.shares_buffer(&c));
    }
}
