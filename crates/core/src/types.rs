use std::path::{Path, PathBuf};

use crate::naming;

/// One reference/deformed image combination, i.e. one DICe job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImagePair {
    pub reference: PathBuf,
    pub deformed: PathBuf,
}

impl ImagePair {
    pub fn new(reference: impl Into<PathBuf>, deformed: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            deformed: deformed.into(),
        }
    }

    /// Directory-safe identifier for this pair.
    pub fn job_name(&self) -> String {
        naming::make_job_name(&self.reference, &self.deformed)
    }

    /// Whether both images share a file name (ignoring case).
    pub fn is_self_pair(&self) -> bool {
        naming::same_file_name(&self.reference, &self.deformed)
    }

    pub fn reference_name(&self) -> String {
        file_name_lossy(&self.reference)
    }

    pub fn deformed_name(&self) -> String {
        file_name_lossy(&self.deformed)
    }
}

/// Final path component as text, or an empty string when there is none.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
