//! Configuration storage for persisted pipeline settings.
//!
//! All state is stored in ~/.topometry/ by default.

use crate::settings_record::{SettingsRecord, StorageError};
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = "settings.json";

/// Configuration storage manager.
///
/// Manages loading and saving of the settings document from a centralized
/// directory (defaults to ~/.topometry/).
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    /// Root directory for all configuration (e.g., ~/.topometry)
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Create a new config storage with default path (~/.topometry)
    pub fn new() -> Result<Self, StorageError> {
        let home = std::env::var("HOME").map_err(|_| StorageError::NoHomeDirectory)?;
        let root_path = PathBuf::from(home).join(".topometry");
        Ok(Self { root_path })
    }

    /// Create a new config storage with custom root path
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root_path.join(SETTINGS_FILE)
    }

    /// Get the stored settings.
    ///
    /// Returns None if nothing has been saved yet.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_settings(&self) -> Option<Result<SettingsRecord, StorageError>> {
        let path = self.settings_path();

        if !path.exists() {
            return None;
        }

        Some(SettingsRecord::load_from_file(&path))
    }

    /// Load settings for startup.
    ///
    /// Never fails: a missing file yields defaults silently, a corrupt one
    /// yields defaults with a warning.
    pub fn load_settings(&self) -> SettingsRecord {
        match self.get_settings() {
            None => {
                tracing::debug!(
                    "No settings at {}, using defaults",
                    self.settings_path().display()
                );
                SettingsRecord::default()
            }
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                tracing::warn!(
                    "Ignoring unreadable settings at {}: {e}",
                    self.settings_path().display()
                );
                SettingsRecord::default()
            }
        }
    }

    /// Save settings, creating the root directory if needed.
    ///
    /// Returns the path written.
    pub fn save_settings(&self, record: &SettingsRecord) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.settings_path();
        record.save_to_file(&path)?;
        Ok(path)
    }

    /// Delete the stored settings.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_settings(&self) -> Result<bool, StorageError> {
        let path = self.settings_path();

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, ConfigStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("nested").join("config"));
        (dir, storage)
    }

    #[test]
    fn test_missing_settings_fall_back_to_defaults() {
        let (_dir, storage) = temp_storage();
        assert!(storage.get_settings().is_none());
        assert_eq!(storage.load_settings(), SettingsRecord::default());
    }

    #[test]
    fn test_save_and_load_settings() {
        let (_dir, storage) = temp_storage();
        let mut record = SettingsRecord {
            scale: 12.5,
            unit: "cm".to_string(),
            homography: Some([2.0, 0.0, 1.0, 0.0, 2.0, 1.0, 0.0, 0.0, 1.0]),
            tutorials_seen: Vec::new(),
        };
        record.mark_seen("arc_length");

        let path = storage.save_settings(&record).unwrap();
        assert!(path.exists());
        assert_eq!(storage.load_settings(), record);
    }

    #[test]
    fn test_corrupt_settings_fall_back_to_defaults() {
        let (_dir, storage) = temp_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(storage.settings_path(), "{ not json").unwrap();

        assert!(matches!(
            storage.get_settings(),
            Some(Err(StorageError::Malformed(_)))
        ));
        assert_eq!(storage.load_settings(), SettingsRecord::default());
    }

    #[test]
    fn test_delete_settings() {
        let (_dir, storage) = temp_storage();
        assert!(!storage.delete_settings().unwrap());

        storage.save_settings(&SettingsRecord::default()).unwrap();
        assert!(storage.delete_settings().unwrap());
        assert!(storage.get_settings().is_none());
    }
}
