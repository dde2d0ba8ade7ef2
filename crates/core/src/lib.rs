//! Domain logic for batch-running the DICe correlation tool.
//!
//! Everything here is free of run-state bookkeeping: the orchestrator in
//! `dicebatch-pipeline` composes these pieces into a batch.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod naming;
pub mod process;
pub mod settings;
pub mod status;
pub mod types;
