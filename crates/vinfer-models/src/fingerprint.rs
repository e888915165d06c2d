//! Video fingerprint type.

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a hex-encoded SHA-256 digest.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Errors produced when parsing a fingerprint from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    #[error("fingerprint must be {FINGERPRINT_HEX_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("fingerprint must be lowercase hex")]
    InvalidCharacter,
}

/// Deterministic digest identifying a (video, parameters) pair.
///
/// Always 64 lowercase hex characters, which makes it safe to use as a
/// directory or file name without further escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoFingerprint(String);

impl VideoFingerprint {
    /// Build a fingerprint from a raw 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut hex = String::with_capacity(FINGERPRINT_HEX_LEN);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        Self(hex)
    }

    /// Parse and validate a hex fingerprint.
    pub fn parse(s: &str) -> Result<Self, FingerprintError> {
        if s.len() != FINGERPRINT_HEX_LEN {
            return Err(FingerprintError::InvalidLength(s.len()));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(FingerprintError::InvalidCharacter);
        }
        Ok(Self(s.to_string()))
    }

    /// Get the inner hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used to spread entries across directories.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for VideoFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JsonSchema for VideoFingerprint {
    fn schema_name() -> String {
        "VideoFingerprint".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

impl FromStr for VideoFingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VideoFingerprint {
    type Error = FingerprintError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VideoFingerprint> for String {
    fn from(fp: VideoFingerprint) -> Self {
        fp.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_digest_is_lowercase_hex() {
        let fp = VideoFingerprint::from_digest(&[0xAB; 32]);
        assert_eq!(fp.as_str().len(), FINGERPRINT_HEX_LEN);
        assert!(fp.as_str().starts_with("abab"));
        assert_eq!(fp.shard(), "ab");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            VideoFingerprint::parse("abc"),
            Err(FingerprintError::InvalidLength(3))
        );

        let upper = "A".repeat(FINGERPRINT_HEX_LEN);
        assert_eq!(
            VideoFingerprint::parse(&upper),
            Err(FingerprintError::InvalidCharacter)
        );

        let traversal = format!("../{}", "a".repeat(FINGERPRINT_HEX_LEN - 3));
        assert!(VideoFingerprint::parse(&traversal).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let fp = VideoFingerprint::from_digest(&[7; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        let back: VideoFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);

        let bad: Result<VideoFingerprint, _> = serde_json::from_str("\"not-a-fingerprint\"");
        assert!(bad.is_err());
    }
}
