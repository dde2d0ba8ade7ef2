//! External process supervision for DICe jobs.
//!
//! [`executor`] defines the [`JobRunner`](executor::JobRunner) seam used by
//! the orchestrator, [`subprocess`] does the spawn, capture and cancel work,
//! and [`tree`] knows how to take down a child together with everything it
//! started.

pub mod executor;
pub mod subprocess;
pub mod tree;

pub use executor::{DiceRunner, JobRunner, ProcessError, ProcessResult, ProcessSpec};
