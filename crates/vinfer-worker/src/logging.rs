//! Structured computation logging and tracing setup.

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn, Span};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vinfer_models::VideoFingerprint;

/// Directives applied before `RUST_LOG`.
const DEFAULT_DIRECTIVES: [&str; 2] = ["vinfer=info", "tower_http=info"];

/// Log file used when `LOG_FILE` is unset.
pub const DEFAULT_LOG_FILE: &str = "logs/vinfer.log";

/// Rotated log files kept on disk (one per day).
const LOG_RETENTION_DAYS: usize = 7;

/// Keeps the background log file writer alive.
///
/// Dropping it flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
///
/// Console output is JSON when `LOG_FORMAT=json` and ANSI text otherwise.
/// Events are also written to `LOG_FILE` (default `logs/vinfer.log`), rotated
/// daily with a week of history; an empty `LOG_FILE` disables the file.
/// `RUST_LOG` directives override the `vinfer=info` default for the same target.
pub fn init_tracing() -> LoggingGuard {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let (env_filter, rejected) = build_filter(std::env::var("RUST_LOG").ok().as_deref());

    let log_file = std::env::var("LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (file_writer, file_guard, file_error) = match open_log_file(&log_file) {
        Ok(Some((writer, guard))) => (Some(writer), Some(guard), None),
        Ok(None) => (None, None, None),
        Err(e) => (None, None, Some(e)),
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);
    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if result.is_err() {
        warn!("Tracing subscriber already installed");
    }
    for directive in rejected {
        warn!(directive = %directive, "Ignoring invalid RUST_LOG directive");
    }
    if let Some(e) = file_error {
        warn!(log_file = %log_file, error = %e, "File logging disabled");
    }

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Default directives with `RUST_LOG` layered on top. Returns the filter and
/// any directives that failed to parse.
fn build_filter(rust_log: Option<&str>) -> (EnvFilter, Vec<String>) {
    let mut filter = EnvFilter::default();
    let mut rejected = Vec::new();

    let overrides = rust_log
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty());

    for directive in DEFAULT_DIRECTIVES.into_iter().chain(overrides) {
        match directive.parse() {
            Ok(parsed) => filter = filter.add_directive(parsed),
            Err(_) => rejected.push(directive.to_string()),
        }
    }

    (filter, rejected)
}

/// Open the daily-rotated log file behind a non-blocking writer.
///
/// Returns `Ok(None)` when `path` is empty.
fn open_log_file(path: &str) -> Result<Option<(NonBlocking, WorkerGuard)>, String> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(None);
    }

    let path = Path::new(path);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{} does not name a file", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(LOG_RETENTION_DAYS)
        .build(dir)
        .map_err(|e| e.to_string())?;

    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// Lifecycle logger for one fingerprint's computation.
#[derive(Debug, Clone)]
pub struct ComputationLogger {
    fingerprint: String,
    operation: String,
}

impl ComputationLogger {
    pub fn new(fingerprint: &VideoFingerprint, operation: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            fingerprint = %self.fingerprint,
            operation = %self.operation,
            "Computation started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            fingerprint = %self.fingerprint,
            operation = %self.operation,
            "Computation progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            fingerprint = %self.fingerprint,
            operation = %self.operation,
            "Computation warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            fingerprint = %self.fingerprint,
            operation = %self.operation,
            "Computation failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            fingerprint = %self.fingerprint,
            operation = %self.operation,
            "Computation completed: {}", message
        );
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span that attaches the fingerprint to everything logged inside it.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "computation",
            fingerprint = %self.fingerprint,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_carries_fingerprint() {
        let fp = VideoFingerprint::from_digest(&[0xab; 32]);
        let logger = ComputationLogger::new(&fp, "inference");

        assert_eq!(logger.fingerprint(), fp.as_str());
        assert_eq!(logger.operation(), "inference");
    }

    #[test]
    fn test_rust_log_overrides_default_level() {
        let (filter, rejected) = build_filter(Some("vinfer=debug"));
        assert!(rejected.is_empty());
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let (filter, _) = build_filter(None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_invalid_directives_are_reported() {
        let (_, rejected) = build_filter(Some("vinfer=loud, ,tower_http=warn"));
        assert_eq!(rejected, vec!["vinfer=loud".to_string()]);
    }

    #[test]
    fn test_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("vinfer.log");

        let opened = open_log_file(path.to_str().unwrap()).unwrap();
        assert!(opened.is_some());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_empty_log_file_disables_file_output() {
        assert!(open_log_file("  ").unwrap().is_none());
    }
}
