//! Raw video storage.
//!
//! Submitted videos are kept under `{root}/{shard}/{fingerprint}.{ext}` so the
//! pipeline can read them from disk. The area is separate from the cache root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::fs::write_atomic;
use vinfer_models::VideoFingerprint;

/// Local video storage.
#[derive(Debug, Clone)]
pub struct VideoStore {
    root: PathBuf,
}

impl VideoStore {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::config_error(format!(
                "Failed to create video directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a video with this fingerprint and extension is stored at.
    pub fn path_for(&self, fingerprint: &VideoFingerprint, extension: &str) -> PathBuf {
        self.root
            .join(fingerprint.shard())
            .join(format!("{}.{}", fingerprint, extension))
    }

    /// Store video bytes. Saving the same fingerprint twice keeps the first copy.
    pub async fn save(
        &self,
        fingerprint: &VideoFingerprint,
        bytes: &[u8],
        extension: &str,
    ) -> StorageResult<PathBuf> {
        if !is_valid_extension(extension) {
            return Err(StorageError::write_failed(format!(
                "Invalid video extension: {:?}",
                extension
            )));
        }

        if let Some(existing) = self.locate(fingerprint).await? {
            debug!(fingerprint = %fingerprint, path = %existing.display(), "Video already stored");
            return Ok(existing);
        }

        let path = self.path_for(fingerprint, extension);
        write_atomic(&path, bytes).await?;
        info!(
            fingerprint = %fingerprint,
            path = %path.display(),
            size = bytes.len(),
            "Stored source video"
        );
        Ok(path)
    }

    /// Find the stored video for a fingerprint, whatever its extension.
    pub async fn locate(&self, fingerprint: &VideoFingerprint) -> StorageResult<Option<PathBuf>> {
        let shard = self.root.join(fingerprint.shard());
        let mut entries = match fs::read_dir(&shard).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::read_failed(format!("{}: {}", shard.display(), e))),
        };

        let prefix = format!("{}.", fingerprint);
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && is_valid_extension(&name[prefix.len()..]) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Delete the stored video. Returns whether a file was removed.
    pub async fn delete(&self, fingerprint: &VideoFingerprint) -> StorageResult<bool> {
        let Some(path) = self.locate(fingerprint).await? else {
            return Ok(false);
        };

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(fingerprint = %fingerprint, "Deleted source video");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", path.display(), e))),
        }
    }

    /// Verify the video area accepts writes.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let marker = self.root.join(format!(".write-check-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&marker, b"ok").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }
}

fn is_valid_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}
