//! Error types for the node engine

use thiserror::Error;

use crate::types::NodeType;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// Input preconditions were not met; never retried
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Node data did not hold the expected variant
    #[error("Node '{node_id}' holds {actual} data, expected {expected}")]
    NodeTypeMismatch {
        node_id: String,
        expected: NodeType,
        actual: NodeType,
    },

    /// Node id not present in the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A node with this id already exists
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// Connection rejected (self-loop, duplicate, unknown endpoint, cycle)
    #[error("Invalid connection {from} -> {to}: {reason}")]
    InvalidConnection {
        from: String,
        to: String,
        reason: String,
    },

    /// No service registered for a node type
    #[error("No service registered for node type '{0}'")]
    UnknownNodeType(NodeType),

    /// Task execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// Provider, fallback or polling error
    #[error(transparent)]
    Router(#[from] model_router::RouterError),

    /// Artifact storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queued task was dropped before completing
    #[error("Task queue closed for owner '{0}'")]
    QueueClosed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a storage error with a message
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the error came from input validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::MissingInput(_))
    }
}
