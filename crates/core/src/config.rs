//! Batch configuration snapshot and its precondition checks.
//!
//! A [`BatchConfiguration`] is captured once per run. Field names serialize
//! in PascalCase so that settings files written by the desktop front end
//! load unchanged.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Correlation subset size in pixels.
pub const DEFAULT_SUBSET_SIZE: u32 = 31;

/// Spacing between correlation points in pixels.
pub const DEFAULT_STEP_SIZE: u32 = 5;

/// Worker threads requested from DICe.
pub const DEFAULT_THREADS: u32 = 4;

// ---------------------------------------------------------------------------
// BatchConfiguration
// ---------------------------------------------------------------------------

/// Everything one batch run needs from the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BatchConfiguration {
    /// Path to the DICe command-line executable.
    pub dice_exe_path: PathBuf,
    /// Folder supplying reference images.
    pub ref_folder_a: PathBuf,
    /// Folder supplying deformed images.
    pub ref_folder_b: PathBuf,
    /// Root folder receiving one subdirectory per job.
    pub output_folder: PathBuf,
    pub subset_size: u32,
    pub step_size: u32,
    pub threads: u32,
    /// Drop pairs whose two images share a file name.
    pub skip_self_compare: bool,
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        Self {
            dice_exe_path: PathBuf::new(),
            ref_folder_a: PathBuf::new(),
            ref_folder_b: PathBuf::new(),
            output_folder: PathBuf::new(),
            subset_size: DEFAULT_SUBSET_SIZE,
            step_size: DEFAULT_STEP_SIZE,
            threads: DEFAULT_THREADS,
            skip_self_compare: true,
        }
    }
}

impl BatchConfiguration {
    /// Check every precondition a run depends on.
    ///
    /// Rules:
    /// - the executable path names an existing file
    /// - both reference folders and the output folder exist as directories
    /// - subset size, step size and thread count are at least 1
    pub fn validate(&self) -> Result<(), CoreError> {
        require_file("DICe executable", &self.dice_exe_path)?;
        require_dir("Reference folder A", &self.ref_folder_a)?;
        require_dir("Reference folder B", &self.ref_folder_b)?;
        require_dir("Output folder", &self.output_folder)?;
        require_positive("Subset size", self.subset_size)?;
        require_positive("Step size", self.step_size)?;
        require_positive("Thread count", self.threads)?;
        Ok(())
    }
}

fn require_file(label: &str, path: &Path) -> Result<(), CoreError> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::Validation(format!("{label} is not set")));
    }
    if !path.is_file() {
        return Err(CoreError::Validation(format!(
            "{label} does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

fn require_dir(label: &str, path: &Path) -> Result<(), CoreError> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::Validation(format!("{label} is not set")));
    }
    if !path.is_dir() {
        return Err(CoreError::Validation(format!(
            "{label} is not a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

fn require_positive(label: &str, value: u32) -> Result<(), CoreError> {
    if value == 0 {
        return Err(CoreError::Validation(format!(
            "{label} must be at least 1"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
