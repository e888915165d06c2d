//! Filesystem cache backend.
//!
//! Layout under the cache root:
//!
//! ```text
//! {root}/{shard}/{fingerprint}/entry.json
//! {root}/{shard}/{fingerprint}/artifact-{sha256 prefix}.gz
//! ```
//!
//! Every file is written to a hidden temp file in the same directory, fsynced
//! and renamed into place. The artifact is published before `entry.json`, so
//! a Ready entry only ever points at a complete artifact file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::CacheBackend;
use crate::codec::{compress_artifact, decode_entry, decompress_artifact, encode_entry};
use crate::error::{StorageError, StorageResult};
use vinfer_models::{Artifact, CacheEntry, VideoFingerprint};

/// Metadata file name inside an entry directory.
const ENTRY_FILE: &str = "entry.json";

/// Marker embedded in temp file names.
const TEMP_MARKER: &str = ".tmp-";

/// Number of digest characters used in artifact file names.
const ARTIFACT_NAME_DIGEST_LEN: usize = 16;

/// Filesystem-backed cache storage.
#[derive(Debug, Clone)]
pub struct FsCacheBackend {
    root: PathBuf,
}

impl FsCacheBackend {
    /// Open (and create if needed) a cache rooted at `root`.
    ///
    /// Temp files left behind by an interrupted write are removed.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::config_error(format!(
                "Failed to create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let removed = remove_stale_temp_files(&root);
        if removed > 0 {
            info!(
                root = %root.display(),
                removed = removed,
                "Removed temp files left by interrupted cache writes"
            );
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, fingerprint: &VideoFingerprint) -> PathBuf {
        self.root
            .join(fingerprint.shard())
            .join(fingerprint.as_str())
    }

    fn entry_path(&self, fingerprint: &VideoFingerprint) -> PathBuf {
        self.entry_dir(fingerprint).join(ENTRY_FILE)
    }
}

#[async_trait]
impl CacheBackend for FsCacheBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn read_entry(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<CacheEntry>> {
        let path = self.entry_path(fingerprint);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let entry = decode_entry(&data)?;
        if &entry.fingerprint != fingerprint {
            return Err(StorageError::corrupt(format!(
                "Entry at {} belongs to {}",
                path.display(),
                entry.fingerprint
            )));
        }
        Ok(Some(entry))
    }

    async fn read_artifact(&self, entry: &CacheEntry) -> StorageResult<Vec<u8>> {
        let location = entry
            .artifact_location
            .as_deref()
            .ok_or_else(|| StorageError::corrupt("Ready entry has no artifact location"))?;
        if !is_plain_file_name(location) {
            return Err(StorageError::corrupt(format!(
                "Invalid artifact location: {}",
                location
            )));
        }

        let path = self.entry_dir(&entry.fingerprint).join(location);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(path.display().to_string()))
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        decompress_artifact(&data)
    }

    async fn publish_ready(
        &self,
        fingerprint: &VideoFingerprint,
        artifact: &Artifact,
    ) -> StorageResult<CacheEntry> {
        let dir = self.entry_dir(fingerprint);
        let location = format!(
            "artifact-{}.gz",
            &artifact.sha256()[..ARTIFACT_NAME_DIGEST_LEN]
        );

        let previous = match self.read_entry(fingerprint).await {
            Ok(entry) => entry,
            Err(e) => {
                debug!(fingerprint = %fingerprint, error = %e, "Ignoring unreadable previous entry");
                None
            }
        };

        let compressed = compress_artifact(artifact.data())?;
        write_atomic(&dir.join(&location), &compressed).await?;

        let entry = CacheEntry::ready(
            fingerprint.clone(),
            location.clone(),
            artifact.len() as u64,
            artifact.sha256(),
            artifact.content_type(),
        );
        write_atomic(&dir.join(ENTRY_FILE), &encode_entry(&entry)?).await?;

        // Superseded artifact files are unreachable once the new entry is live.
        if let Some(old) = previous.and_then(|p| p.artifact_location) {
            if old != location && is_plain_file_name(&old) {
                if let Err(e) = fs::remove_file(dir.join(&old)).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(fingerprint = %fingerprint, error = %e, "Failed to remove superseded artifact");
                    }
                }
            }
        }

        debug!(
            fingerprint = %fingerprint,
            location = %location,
            size = artifact.len(),
            compressed_size = compressed.len(),
            "Artifact published"
        );
        Ok(entry)
    }

    async fn write_entry(&self, entry: &CacheEntry) -> StorageResult<()> {
        let path = self.entry_path(&entry.fingerprint);
        write_atomic(&path, &encode_entry(entry)?).await
    }

    async fn remove(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool> {
        let dir = self.entry_dir(fingerprint);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!(
                "{}: {}",
                dir.display(),
                e
            ))),
        }
    }

    async fn list(&self) -> StorageResult<Vec<VideoFingerprint>> {
        let mut fingerprints = Vec::new();
        let mut shards = fs::read_dir(&self.root).await?;

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Ok(fp) = VideoFingerprint::parse(name) {
                    fingerprints.push(fp);
                }
            }
        }

        fingerprints.sort();
        Ok(fingerprints)
    }

    async fn check_writable(&self) -> StorageResult<()> {
        let marker = self.root.join(format!(".write-check{}{}", TEMP_MARKER, Uuid::new_v4().simple()));
        fs::write(&marker, b"ok").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }
}

/// Write `bytes` to `path` so that readers see either the old file or the
/// complete new one.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::write_failed(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let tmp = parent.join(format!(
        ".{}{}{}",
        file_name,
        TEMP_MARKER,
        Uuid::new_v4().simple()
    ));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::write_failed(format!(
            "{}: {}",
            path.display(),
            e
        )));
    }

    // Persist the rename itself; not every platform supports syncing a directory.
    if let Ok(dir) = fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }

    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

/// Recursively delete temp files under `dir`. Returns how many were removed.
fn remove_stale_temp_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            removed += remove_stale_temp_files(&path);
        } else if entry.file_name().to_str().is_some_and(is_temp_file)
            && std::fs::remove_file(&path).is_ok()
        {
            removed += 1;
        }
    }
    removed
}
