//! On-disk encodings for artifacts and entry metadata.
//!
//! Artifacts are stored gzip-compressed; the gzip trailer CRC doubles as a
//! cheap integrity check on read. Entry metadata is plain JSON so it can be
//! inspected by hand.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{StorageError, StorageResult};
use vinfer_models::CacheEntry;

/// Compress artifact bytes with gzip.
pub fn compress_artifact(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip artifact: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress artifact bytes.
///
/// Truncated or otherwise damaged input yields `StorageError::Corrupt`.
pub fn decompress_artifact(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::corrupt(format!("Failed to decompress artifact: {}", e)))?;
    Ok(out)
}

/// Serialize entry metadata.
pub fn encode_entry(entry: &CacheEntry) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(entry)
        .map_err(|e| StorageError::Serialization(format!("Failed to serialize cache entry: {}", e)))
}

/// Deserialize entry metadata.
pub fn decode_entry(data: &[u8]) -> StorageResult<CacheEntry> {
    serde_json::from_slice(data)
        .map_err(|e| StorageError::corrupt(format!("Failed to parse cache entry: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vinfer_models::VideoFingerprint;

    #[test]
    fn test_truncated_artifact_is_corrupt() {
        let compressed = compress_artifact(&vec![42u8; 4096]).unwrap();
        let truncated = &compressed[..compressed.len() / 2];

        let err = decompress_artifact(truncated).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_plain_bytes_are_corrupt() {
        let err = decompress_artifact(b"not gzip data at all").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_invalid_entry_json_is_corrupt() {
        let err = decode_entry(b"{ invalid json }").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_entry_roundtrip_keeps_fingerprint() {
        let entry = CacheEntry::failed(VideoFingerprint::from_digest(&[9; 32]), "boom");
        let decoded = decode_entry(&encode_entry(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }
}
