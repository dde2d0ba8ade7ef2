//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`RunEvent`]s from the orchestrator to any number of
//! observers (terminal printer, JSON stream, tests).

use dicebatch_core::status::RunStatus;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// One observable change to a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run started (`true`) or ended (`false`).
    RunningChanged(bool),
    StatusChanged(RunStatus),
    /// `fraction` is `completed / total`.
    Progress {
        completed: usize,
        total: usize,
        fraction: f64,
    },
    /// One line appended to the run log.
    Log(String),
}

impl RunEvent {
    /// Serialize as a single JSON line.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use dicebatch_events::bus::{EventBus, RunEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RunEvent::Log("Ready.".into()));
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed events are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: RunEvent) {
        // A SendError only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
