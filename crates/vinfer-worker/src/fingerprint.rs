//! Content fingerprinting for submitted videos.
//!
//! The digest covers a versioned domain tag, the canonical parameter encoding
//! (length-prefixed so it cannot run into the video bytes) and the raw video
//! bytes. Changing the tag invalidates every existing cache entry, which is
//! how the encoding is allowed to evolve.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use vinfer_models::{ProcessingParams, VideoFingerprint};

use crate::error::{WorkerError, WorkerResult};

const DOMAIN_TAG: &[u8] = b"vinfer-fp-v1";

const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Fingerprint of a video payload processed with `params`.
pub fn fingerprint(video: &[u8], params: &ProcessingParams) -> WorkerResult<VideoFingerprint> {
    if video.is_empty() {
        return Err(WorkerError::invalid_input("Video payload is empty"));
    }
    let mut hasher = seeded_hasher(params)?;
    hasher.update(video);
    Ok(finish(hasher))
}

/// Fingerprint of a video file on disk, read in chunks.
pub async fn fingerprint_file(path: &Path, params: &ProcessingParams) -> WorkerResult<VideoFingerprint> {
    let mut hasher = seeded_hasher(params)?;

    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        WorkerError::invalid_input(format!("Cannot read video {}: {}", path.display(), e))
    })?;

    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0usize;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n;
    }

    if total == 0 {
        return Err(WorkerError::invalid_input(format!(
            "Video file {} is empty",
            path.display()
        )));
    }
    Ok(finish(hasher))
}

/// Guess the container format from the leading bytes.
///
/// Returns the file extension used when storing the video.
pub fn sniff_container(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return if &bytes[8..12] == b"qt  " { "mov" } else { "mp4" };
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let head = &bytes[..bytes.len().min(64)];
        return if head.windows(4).any(|w| w == b"webm") {
            "webm"
        } else {
            "mkv"
        };
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
        return "avi";
    }
    "bin"
}

fn seeded_hasher(params: &ProcessingParams) -> WorkerResult<Sha256> {
    params.validate().map_err(WorkerError::invalid_input)?;

    let encoded = params.canonical_bytes();
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_TAG);
    hasher.update((encoded.len() as u64).to_be_bytes());
    hasher.update(&encoded);
    Ok(hasher)
}

fn finish(hasher: Sha256) -> VideoFingerprint {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    VideoFingerprint::from_digest(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProcessingParams {
        ProcessingParams::new("v1")
    }

    #[test]
    fn test_same_input_same_fingerprint() {
        let a = fingerprint(b"video bytes", &params()).unwrap();
        let b = fingerprint(b"video bytes", &params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_param_change_changes_fingerprint() {
        let base = fingerprint(b"video bytes", &params()).unwrap();
        let variants = [
            ProcessingParams::new("v2"),
            params().with_resolution(640, 360),
            params().with_frame_stride(5),
            params().with_option("threshold", "0.5"),
        ];
        for variant in variants {
            assert_ne!(fingerprint(b"video bytes", &variant).unwrap(), base);
        }
    }

    #[test]
    fn test_option_order_does_not_matter() {
        let a = params().with_option("a", "1").with_option("b", "2");
        let b = params().with_option("b", "2").with_option("a", "1");
        assert_eq!(
            fingerprint(b"clip", &a).unwrap(),
            fingerprint(b"clip", &b).unwrap()
        );
    }

    #[test]
    fn test_empty_video_rejected() {
        let err = fingerprint(b"", &params()).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let err = fingerprint(b"clip", &params().with_frame_stride(0)).unwrap_err();
        assert!(matches!(err, WorkerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_file_matches_in_memory_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let data: Vec<u8> = (0..READ_CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(
            fingerprint_file(&path, &params()).await.unwrap(),
            fingerprint(&data, &params()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = fingerprint_file(&dir.path().join("nope.mp4"), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidInput(_)));
    }

    #[test]
    fn test_sniff_container() {
        assert_eq!(sniff_container(b"\0\0\0\x18ftypisom\0\0\0\0"), "mp4");
        assert_eq!(sniff_container(b"\0\0\0\x14ftypqt  \0\0\0\0"), "mov");
        assert_eq!(sniff_container(b"\x1a\x45\xdf\xa3\x9f\x42\x82\x84webm"), "webm");
        assert_eq!(sniff_container(b"\x1a\x45\xdf\xa3\x9f\x42\x82\x88matroska"), "mkv");
        assert_eq!(sniff_container(b"RIFF\0\0\0\0AVI LIST"), "avi");
        assert_eq!(sniff_container(b"hello"), "bin");
    }
}
