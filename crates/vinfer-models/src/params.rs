//! Processing parameters applied to a video.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest accepted target dimension, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Largest accepted frame stride.
pub const MAX_FRAME_STRIDE: u32 = 1000;

/// Parameters that influence the inference result.
///
/// Every field takes part in the fingerprint, so two submissions of the same
/// video with different parameters are cached separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingParams {
    /// Model version the artifact is produced with
    pub model_version: String,
    /// Frame width the pipeline resizes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_width: Option<u32>,
    /// Frame height the pipeline resizes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_height: Option<u32>,
    /// Sample every Nth frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stride: Option<u32>,
    /// Free-form pipeline options (sorted, so encoding is stable)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl ProcessingParams {
    /// Create params for a model version with no other settings.
    pub fn new(model_version: impl Into<String>) -> Self {
        Self {
            model_version: model_version.into(),
            target_width: None,
            target_height: None,
            frame_stride: None,
            options: BTreeMap::new(),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.target_width = Some(width);
        self.target_height = Some(height);
        self
    }

    pub fn with_frame_stride(mut self, stride: u32) -> Self {
        self.frame_stride = Some(stride);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_version.trim().is_empty() {
            return Err("Model version must be specified".to_string());
        }

        for (name, value) in [("width", self.target_width), ("height", self.target_height)] {
            if let Some(v) = value {
                if v == 0 || v > MAX_DIMENSION {
                    return Err(format!(
                        "Target {} must be between 1 and {}",
                        name, MAX_DIMENSION
                    ));
                }
            }
        }

        if let Some(stride) = self.frame_stride {
            if stride == 0 || stride > MAX_FRAME_STRIDE {
                return Err(format!(
                    "Frame stride must be between 1 and {}",
                    MAX_FRAME_STRIDE
                ));
            }
        }

        if self.options.keys().any(|k| k.trim().is_empty()) {
            return Err("Option keys must not be empty".to_string());
        }

        Ok(())
    }

    /// Canonical byte encoding used for fingerprinting.
    ///
    /// Field order follows the struct declaration and option keys are sorted,
    /// so the encoding only changes when a value changes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Serializing plain strings, integers and a BTreeMap cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bytes_stable_under_option_order() {
        let a = ProcessingParams::new("v1")
            .with_option("b", "2")
            .with_option("a", "1");
        let b = ProcessingParams::new("v1")
            .with_option("a", "1")
            .with_option("b", "2");
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_canonical_bytes_change_with_values() {
        let base = ProcessingParams::new("v1");
        let resized = base.clone().with_resolution(640, 480);
        let other_model = ProcessingParams::new("v2");
        assert_ne!(base.canonical_bytes(), resized.canonical_bytes());
        assert_ne!(base.canonical_bytes(), other_model.canonical_bytes());
    }

    #[test]
    fn test_validate() {
        assert!(ProcessingParams::new("v1").validate().is_ok());
        assert!(ProcessingParams::new("  ").validate().is_err());
        assert!(ProcessingParams::new("v1")
            .with_resolution(0, 480)
            .validate()
            .is_err());
        assert!(ProcessingParams::new("v1")
            .with_resolution(640, MAX_DIMENSION + 1)
            .validate()
            .is_err());
        assert!(ProcessingParams::new("v1")
            .with_frame_stride(0)
            .validate()
            .is_err());
        assert!(ProcessingParams::new("v1")
            .with_option("", "x")
            .validate()
            .is_err());
    }
}
