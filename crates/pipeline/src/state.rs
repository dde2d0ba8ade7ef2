//! Observable state of the current (or last) batch run.

use dicebatch_core::status::RunStatus;

/// Snapshot handed to observers.
///
/// `progress` never decreases within a run and always equals
/// `completed / total` of the last progress update. `log` only grows while a
/// run is active; it is kept across runs so a front end can show history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub is_running: bool,
    /// Fraction in `0.0..=1.0`.
    pub progress: f64,
    pub status: RunStatus,
    pub log: Vec<String>,
}

impl RunState {
    /// The log as one newline-separated text block.
    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }
}
