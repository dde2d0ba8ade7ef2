//! Run-event fan-out for batch observers.
//!
//! The orchestrator publishes a [`RunEvent`](bus::RunEvent) for every change
//! to its run state; front ends subscribe instead of polling.

pub mod bus;

pub use bus::{EventBus, RunEvent};
