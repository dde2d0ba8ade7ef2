//! Batch orchestration: pair planning, sequential job execution and the
//! observable run state.

pub mod error;
pub mod orchestrator;
pub mod pairs;
pub mod state;

pub use error::{BatchError, EmptyReason, Rejection, RunOutcome};
pub use orchestrator::Orchestrator;
pub use state::RunState;
