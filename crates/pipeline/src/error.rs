use std::path::PathBuf;

use dicebatch_core::descriptor::DescriptorError;
use dicebatch_core::process::ProcessError;
use dicebatch_core::status::RunStatus;

/// A fault that aborts the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("failed to list images in {}: {source}", folder.display())]
    Enumerate {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template missing or job artifacts could not be written.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// DICe could not be started or waited on.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Why a run was refused at the precondition gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("{0}")]
    InvalidConfiguration(String),
}

/// Why a run ended without executing any job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// One or both folders contain no images.
    NoImages,
    /// Every pair was excluded by skip-self-compare.
    NoPairs,
}

/// How one call to [`Orchestrator::run`](crate::Orchestrator::run) ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every job ran; individual jobs may still have exited non-zero.
    Done,
    Canceled,
    Empty(EmptyReason),
    Failed(BatchError),
    /// The run never started.
    Rejected(Rejection),
}

impl RunOutcome {
    /// Terminal status recorded for this outcome, `None` when the run
    /// never started.
    pub fn status(&self) -> Option<RunStatus> {
        match self {
            Self::Done => Some(RunStatus::Done),
            Self::Canceled => Some(RunStatus::Canceled),
            Self::Empty(_) => Some(RunStatus::Empty),
            Self::Failed(_) => Some(RunStatus::Error),
            Self::Rejected(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
