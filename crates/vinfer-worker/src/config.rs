//! Worker configuration.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Cache store root
    pub cache_dir: PathBuf,
    /// Raw video input root
    pub video_dir: PathBuf,
    /// How long a single waiter waits for a computation
    pub waiter_timeout: Duration,
    /// Maximum computations running at once (0 = unlimited)
    pub max_concurrent_computations: usize,
    /// Age after which cache entries expire (`None` = never)
    pub cache_expiry: Option<Duration>,
    /// How often the sweeper scans for expired entries
    pub sweep_interval: Duration,
    /// Largest accepted video payload in bytes
    pub max_video_size: usize,
    /// Model version used when a request does not name one
    pub default_model_version: String,
    /// External pipeline program (`None` = no pipeline configured)
    pub pipeline_command: Option<String>,
    /// Arguments for the pipeline program; `{input}` is replaced by the video path
    pub pipeline_args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            video_dir: PathBuf::from("data/videos"),
            waiter_timeout: Duration::from_secs(300),
            max_concurrent_computations: 2,
            cache_expiry: Some(Duration::from_secs(24 * 3600)),
            sweep_interval: Duration::from_secs(600),
            max_video_size: 512 * 1024 * 1024,
            default_model_version: "v1".to_string(),
            pipeline_command: None,
            pipeline_args: vec!["{input}".to_string()],
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_expiry = match std::env::var("CACHE_EXPIRY_HOURS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(hours) => expiry_from_hours(hours).unwrap_or(defaults.cache_expiry),
            None => defaults.cache_expiry,
        };

        Self {
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            video_dir: std::env::var("VIDEO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.video_dir),
            waiter_timeout: Duration::from_secs(
                std::env::var("WAITER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_concurrent_computations: std::env::var("MAX_CONCURRENT_COMPUTATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            cache_expiry,
            sweep_interval: Duration::from_secs(
                std::env::var("CACHE_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            max_video_size: std::env::var("MAX_VIDEO_SIZE_MB")
                .ok()
                .and_then(|s| megabytes(&s))
                .unwrap_or(defaults.max_video_size),
            default_model_version: std::env::var("MODEL_VERSION")
                .unwrap_or(defaults.default_model_version),
            pipeline_command: std::env::var("PIPELINE_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            pipeline_args: std::env::var("PIPELINE_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.pipeline_args),
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.waiter_timeout.is_zero() {
            return Err(WorkerError::config_error("WAITER_TIMEOUT_SECS must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(WorkerError::config_error(
                "CACHE_SWEEP_INTERVAL_SECS must be positive",
            ));
        }
        if self.max_video_size == 0 {
            return Err(WorkerError::config_error("MAX_VIDEO_SIZE_MB must be positive"));
        }
        if self.default_model_version.trim().is_empty() {
            return Err(WorkerError::config_error("MODEL_VERSION must not be empty"));
        }

        let cache = normalize(&self.cache_dir);
        let video = normalize(&self.video_dir);
        if cache.starts_with(&video) || video.starts_with(&cache) {
            return Err(WorkerError::config_error(format!(
                "CACHE_DIR ({}) and VIDEO_DIR ({}) must not overlap",
                self.cache_dir.display(),
                self.video_dir.display()
            )));
        }

        Ok(())
    }
}

/// Parse a size in megabytes into bytes. `None` if unparsable or too large.
pub fn megabytes(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok()?.checked_mul(1024 * 1024)
}

/// Expiry for `hours` (0 = never). The outer `None` means out of range.
fn expiry_from_hours(hours: u64) -> Option<Option<Duration>> {
    match hours.checked_mul(3600)? {
        0 => Some(None),
        secs => Some(Some(Duration::from_secs(secs))),
    }
}

/// Absolute, lexically normalized form of a path that may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
