//! Event types for streaming execution progress
//!
//! Events are sent from the registry to the host (or any consumer)
//! to report batch progress and per-node outcomes.

use serde::{Deserialize, Serialize};

use crate::types::NodeType;

/// Trait for sending execution events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the registry to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionEvent {
    /// A batch run started
    #[serde(rename_all = "camelCase")]
    BatchStarted {
        execution_id: String,
        total: usize,
        /// Nodes excluded from the run because of a cycle
        skipped: Vec<String>,
    },

    /// A node started executing
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        execution_id: String,
        node_id: String,
        node_type: NodeType,
    },

    /// A node finished successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        execution_id: String,
        node_id: String,
        from_cache: bool,
    },

    /// A node failed (validation or execution)
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
    },

    /// Progress after each node settles (1-based `current`)
    #[serde(rename_all = "camelCase")]
    Progress {
        execution_id: String,
        current: usize,
        total: usize,
        node_title: String,
    },

    /// A batch run finished
    #[serde(rename_all = "camelCase")]
    BatchCompleted {
        execution_id: String,
        success: usize,
        failed: usize,
    },
}

impl ExecutionEvent {
    /// Execution id the event belongs to
    pub fn execution_id(&self) -> &str {
        match self {
            Self::BatchStarted { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. }
            | Self::Progress { execution_id, .. }
            | Self::BatchCompleted { execution_id, .. } => execution_id,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ExecutionEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<ExecutionEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ExecutionEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
