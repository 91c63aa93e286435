//! Persisted calibration and user settings.
//!
//! A flat JSON document written whenever calibration or tutorial state
//! changes and read once at startup:
//!
//! ```text
//! { "scale": 1.0, "unit": "px", "homography": [9 floats] | null, "tutorials_seen": ["..."] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors reading or writing persisted settings
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Document parsed but holds values the pipeline cannot use
    #[error("settings document is invalid: {0}")]
    Invalid(String),

    #[error("HOME is not set; cannot locate settings directory")]
    NoHomeDirectory,
}

/// Flat settings document persisted between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    /// Pixels per real unit
    pub scale: f64,
    /// Real-world unit label, e.g. "cm"
    pub unit: String,
    /// Row-major pixel to rectified-pixel homography, if calibrated
    pub homography: Option<[f64; 9]>,
    /// Tutorial identifiers the user has already dismissed
    #[serde(default)]
    pub tutorials_seen: Vec<String>,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            scale: 1.0,
            unit: "px".to_string(),
            homography: None,
            tutorials_seen: Vec::new(),
        }
    }
}

impl SettingsRecord {
    /// Reject values that would poison the calibrator on restore
    pub fn validate(&self) -> Result<(), StorageError> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(StorageError::Invalid(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        if let Some(h) = &self.homography {
            if h.iter().any(|v| !v.is_finite()) {
                return Err(StorageError::Invalid(
                    "homography contains non-finite entries".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn has_seen(&self, tutorial: &str) -> bool {
        self.tutorials_seen.iter().any(|t| t == tutorial)
    }

    /// Record a tutorial as seen. Returns false if it was already recorded.
    pub fn mark_seen(&mut self, tutorial: &str) -> bool {
        if self.has_seen(tutorial) {
            return false;
        }
        self.tutorials_seen.push(tutorial.to_string());
        true
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, StorageError> {
        let json = std::fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&json)?;
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_uncalibrated() {
        let record = SettingsRecord::default();
        assert_eq!(record.scale, 1.0);
        assert_eq!(record.unit, "px");
        assert!(record.homography.is_none());
        assert!(record.tutorials_seen.is_empty());
    }

    #[test]
    fn test_json_schema_field_names() {
        let mut record = SettingsRecord::default();
        record.homography = Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        record.mark_seen("gradient");

        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["unit"], "px");
        assert_eq!(value["homography"].as_array().unwrap().len(), 9);
        assert_eq!(value["tutorials_seen"][0], "gradient");
    }

    #[test]
    fn test_null_homography_and_missing_tutorials() {
        let record: SettingsRecord =
            serde_json::from_str(r#"{"scale": 2.5, "unit": "cm", "homography": null}"#).unwrap();
        assert_eq!(record.scale, 2.5);
        assert!(record.homography.is_none());
        assert!(record.tutorials_seen.is_empty());
    }

    #[test]
    fn test_mark_seen_is_idempotent() {
        let mut record = SettingsRecord::default();
        assert!(record.mark_seen("volume"));
        assert!(!record.mark_seen("volume"));
        assert_eq!(record.tutorials_seen.len(), 1);
    }

    #[test]
    fn test_load_rejects_non_positive_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scale": 0.0, "unit": "cm", "homography": null}"#).unwrap();

        assert!(matches!(
            SettingsRecord::load_from_file(&path),
            Err(StorageError::Invalid(_))
        ));
    }
}
