//! Processing state reported for a fingerprint.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What the service currently knows about a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingState {
    /// Artifact is cached and can be fetched
    Ready,
    /// A computation is in flight
    Pending,
    /// Last computation failed; the next submission retries it
    Failed { reason: String },
    /// Nothing is known about this fingerprint
    Missing,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Ready => "ready",
            ProcessingState::Pending => "pending",
            ProcessingState::Failed { .. } => "failed",
            ProcessingState::Missing => "missing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_carries_reason() {
        let state = ProcessingState::Failed {
            reason: "decoder crashed".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "decoder crashed");
    }
}
