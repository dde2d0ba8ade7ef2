//! Batch run status shown to the collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a batch run currently stands.
///
/// `Done`, `Canceled`, `Error` and `Empty` are terminal: the run is over and
/// a new one may be started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Building,
    Running { completed: usize, total: usize },
    Done,
    Canceled,
    Error,
    /// No images were found, or every pair was excluded.
    Empty,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Error | Self::Empty)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Building => write!(f, "Building job list..."),
            Self::Running { completed, total } => write!(f, "Running... ({completed}/{total})"),
            Self::Done => write!(f, "Done"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Error => write!(f, "Error"),
            Self::Empty => write!(f, "Nothing to run"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
