//! Worker error types.

use std::time::Duration;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Timed out after {}s waiting for computation", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vinfer_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether submitting the same request again may succeed.
    ///
    /// Failed computations are not cached as hits, so a retry reruns them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Computation(_)
                | WorkerError::Timeout(_)
                | WorkerError::Storage(_)
                | WorkerError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_duration() {
        let err = WorkerError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1.5s waiting for computation");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_input_not_retryable() {
        assert!(!WorkerError::invalid_input("empty video").is_retryable());
    }
}
