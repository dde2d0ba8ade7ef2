//! Persisted batch settings.
//!
//! The collaborator decides when to persist: nothing here writes on field
//! changes. The document is the JSON form of [`BatchConfiguration`] stored
//! at `<config dir>/DICeBatch/settings.json`.

use std::path::{Path, PathBuf};

use crate::config::BatchConfiguration;

/// Folder under the platform configuration directory.
pub const APP_FOLDER_NAME: &str = "DICeBatch";

pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no per-user configuration directory is available on this platform")]
    NoConfigDir,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Loads and saves a [`BatchConfiguration`] at a fixed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at the per-user default location.
    pub fn default_location() -> Result<Self, SettingsError> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::at(dir.join(APP_FOLDER_NAME).join(SETTINGS_FILE_NAME)))
    }

    /// Store at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored settings.
    ///
    /// A missing, unreadable or corrupt file yields the defaults; the
    /// problem is logged but never fatal.
    pub fn load(&self) -> BatchConfiguration {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No settings file found, using defaults");
                return BatchConfiguration::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read settings, using defaults");
                return BatchConfiguration::default();
            }
        };

        match serde_json::from_str(&json) {
            Ok(config) => {
                tracing::debug!(path = %self.path.display(), "Settings loaded");
                config
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to parse settings, using defaults");
                BatchConfiguration::default()
            }
        }
    }

    /// Write `config`, creating the parent directory when needed.
    pub fn save(&self, config: &BatchConfiguration) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, json).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::at(dir.path().join("settings.json"));
        assert_eq!(store.load(), BatchConfiguration::default());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert_eq!(SettingsStore::at(&path).load(), BatchConfiguration::default());
    }

    #[test]
    fn save_creates_parent_and_load_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SettingsStore::at(dir.path().join(APP_FOLDER_NAME).join(SETTINGS_FILE_NAME));
        let config = BatchConfiguration {
            dice_exe_path: "/opt/dice/dice".into(),
            ref_folder_a: "/data/a".into(),
            ref_folder_b: "/data/b".into(),
            output_folder: "/data/out".into(),
            subset_size: 21,
            step_size: 3,
            threads: 8,
            skip_self_compare: false,
        };

        store.save(&config).expect("save");
        assert!(store.path().is_file());
        assert_eq!(store.load(), config);
    }

    #[test]
    fn reads_desktop_app_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
  "DiceExePath": "C:\\DICe\\dice.exe",
  "RefFolderA": "C:\\imgs\\a",
  "RefFolderB": "C:\\imgs\\b",
  "OutputFolder": "C:\\out",
  "SubsetSize": 35,
  "StepSize": 6,
  "Threads": 2,
  "SkipSelfCompare": false
}"#,
        )
        .expect("write");

        let config = SettingsStore::at(&path).load();
        assert_eq!(config.subset_size, 35);
        assert_eq!(config.threads, 2);
        assert!(!config.skip_self_compare);
        assert_eq!(config.ref_folder_b, PathBuf::from("C:\\imgs\\b"));
    }
}
