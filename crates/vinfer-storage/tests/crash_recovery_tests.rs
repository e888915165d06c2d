//! Cache store behaviour after interrupted or damaged writes.

use std::path::{Path, PathBuf};

use chrono::Utc;
use vinfer_models::{Artifact, CacheEntry, EntryStatus, VideoFingerprint};
use vinfer_storage::{CacheStore, FsCacheBackend};

fn fp(byte: u8) -> VideoFingerprint {
    VideoFingerprint::from_digest(&[byte; 32])
}

fn entry_dir(root: &Path, fingerprint: &VideoFingerprint) -> PathBuf {
    root.join(fingerprint.shard()).join(fingerprint.as_str())
}

/// Artifact written but the process died before `entry.json` was published.
#[tokio::test]
async fn test_artifact_without_entry_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let dir_for_fp = entry_dir(dir.path(), &fp(1));
    std::fs::create_dir_all(&dir_for_fp).unwrap();
    std::fs::write(dir_for_fp.join("artifact-0123456789abcdef.gz"), b"orphan").unwrap();

    let store = CacheStore::filesystem(dir.path()).unwrap();
    assert!(store.lookup(&fp(1)).await.unwrap().is_none());
    assert!(store.load_ready(&fp(1)).await.unwrap().is_none());

    // The orphaned directory is cleaned up by the next sweep.
    assert_eq!(store.sweep_expired(Utc::now()).await.unwrap(), 1);
    assert!(!dir_for_fp.exists());
}

/// A half-written temp file from an interrupted publish never becomes visible.
#[tokio::test]
async fn test_temp_files_are_ignored_and_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let dir_for_fp = entry_dir(dir.path(), &fp(2));
    std::fs::create_dir_all(&dir_for_fp).unwrap();
    let temp = dir_for_fp.join(".entry.json.tmp-0000");
    std::fs::write(&temp, br#"{"fingerprint": "#).unwrap();

    let store = CacheStore::filesystem(dir.path()).unwrap();
    assert!(!temp.exists());
    assert!(store.load_ready(&fp(2)).await.unwrap().is_none());
}

/// Interrupted republish keeps the previous Ready entry servable.
#[tokio::test]
async fn test_previous_entry_survives_interrupted_republish() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::filesystem(dir.path()).unwrap();
    let original = Artifact::new(b"original result".to_vec());
    store.commit(&fp(3), &original).await.unwrap();

    // Simulate a crash after the new artifact landed but before the entry swap.
    let dir_for_fp = entry_dir(dir.path(), &fp(3));
    std::fs::write(dir_for_fp.join("artifact-ffffffffffffffff.gz"), b"new but unpublished").unwrap();

    let reopened = CacheStore::filesystem(dir.path()).unwrap();
    assert_eq!(reopened.load_ready(&fp(3)).await.unwrap(), Some(original));
}

#[tokio::test]
async fn test_truncated_artifact_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::filesystem(dir.path()).unwrap();
    let entry = store
        .commit(&fp(4), &Artifact::new(vec![7u8; 64 * 1024]))
        .await
        .unwrap();

    let artifact_path = entry_dir(dir.path(), &fp(4)).join(entry.artifact_location.unwrap());
    let bytes = std::fs::read(&artifact_path).unwrap();
    std::fs::write(&artifact_path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(store.load_ready(&fp(4)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_garbled_entry_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::filesystem(dir.path()).unwrap();
    store.commit(&fp(5), &Artifact::new(b"ok".to_vec())).await.unwrap();

    std::fs::write(entry_dir(dir.path(), &fp(5)).join("entry.json"), b"\0\0garbage").unwrap();

    assert!(store.load_ready(&fp(5)).await.unwrap().is_none());
    assert!(store.lookup(&fp(5)).await.is_err());
}

#[tokio::test]
async fn test_outdated_format_version_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FsCacheBackend::new(dir.path()).unwrap();
    let store = CacheStore::filesystem(dir.path()).unwrap();

    let mut entry = store.commit(&fp(6), &Artifact::new(b"old".to_vec())).await.unwrap();
    entry.format_version = 0;
    vinfer_storage::CacheBackend::write_entry(&backend, &entry).await.unwrap();

    assert!(store.load_ready(&fp(6)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_then_committed_becomes_ready() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::filesystem(dir.path()).unwrap();

    store.mark_failed(&fp(7), "first attempt crashed").await.unwrap();
    let failed = store.lookup(&fp(7)).await.unwrap().unwrap();
    assert_eq!(failed.status, EntryStatus::Failed);

    let artifact = Artifact::new(b"second attempt".to_vec());
    store.commit(&fp(7), &artifact).await.unwrap();

    let ready: CacheEntry = store.lookup(&fp(7)).await.unwrap().unwrap();
    assert_eq!(ready.status, EntryStatus::Ready);
    assert!(ready.failure_reason.is_none());
    assert_eq!(store.load_ready(&fp(7)).await.unwrap(), Some(artifact));
}
