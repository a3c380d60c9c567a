//! Node service contract
//!
//! One [`NodeService`] exists per node type. Services implement
//! `validate_inputs` and `execute`; the provided `execute_node` template
//! method wraps them with status transitions and error containment so a
//! failing node never takes down the batch that runs it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::data::NodeData;
use crate::error::{NodeEngineError, Result};
use crate::types::{Node, NodeStatus, NodeType};

/// Outcome of input validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(NodeEngineError::Validation(self.errors))
        }
    }
}

/// Structured result of running one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    pub success: bool,
    /// Node data after execution
    pub data: Option<NodeData>,
    /// Named outputs for downstream consumers and the host
    #[serde(default)]
    pub outputs: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl NodeExecutionResult {
    pub fn success(data: NodeData) -> Self {
        Self {
            success: true,
            data: Some(data),
            outputs: HashMap::new(),
            error: None,
            from_cache: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            outputs: HashMap::new(),
            error: Some(error.into()),
            from_cache: false,
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    pub fn with_from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }
}

/// Behavior of one node type
#[async_trait]
pub trait NodeService: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Check required data and upstream connections. Must not have side effects.
    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult;

    /// Do the node's work, writing results through `ctx`
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult>;

    /// Validate, run and record status. Never returns an error: failures and
    /// panics inside `execute` become an error status and a failed result.
    async fn execute_node(&self, node: &Node, ctx: &ExecutionContext) -> NodeExecutionResult {
        let fail = |message: String| {
            log::warn!("Node '{}' ({}) failed: {}", node.id, node.node_type(), message);
            ctx.update_node_status(&node.id, NodeStatus::Error, Some(&message));
            NodeExecutionResult::failure(message)
        };

        if node.node_type() != self.node_type() {
            return fail(
                NodeEngineError::NodeTypeMismatch {
                    node_id: node.id.clone(),
                    expected: self.node_type(),
                    actual: node.node_type(),
                }
                .to_string(),
            );
        }

        let validation = self.validate_inputs(node, ctx);
        if !validation.valid {
            return fail(NodeEngineError::Validation(validation.errors).to_string());
        }

        ctx.update_node_status(&node.id, NodeStatus::Running, None);
        log::debug!("Executing node '{}' ({})", node.id, node.node_type());

        match AssertUnwindSafe(self.execute(node, ctx)).catch_unwind().await {
            Ok(Ok(result)) if result.success => {
                ctx.update_node_status(&node.id, NodeStatus::Success, None);
                result
            }
            Ok(Ok(result)) => {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Node execution failed".to_string());
                log::warn!("Node '{}' reported failure: {}", node.id, message);
                ctx.update_node_status(&node.id, NodeStatus::Error, Some(&message));
                result
            }
            Ok(Err(e)) => fail(e.to_string()),
            Err(panic) => fail(format!("Node execution panicked: {}", panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
