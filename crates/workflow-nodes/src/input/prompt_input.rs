//! Prompt Input Service
//!
//! Holds user-entered text and hands it downstream unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutionContext, Node, NodeData, NodeExecutionResult, NodeService, NodeType, Result,
    ServiceRegistration, ValidationResult,
};

pub struct PromptInputService;

impl PromptInputService {
    /// Output key for the prompt text
    pub const OUTPUT_TEXT: &'static str = "text";
}

#[async_trait]
impl NodeService for PromptInputService {
    fn node_type(&self) -> NodeType {
        NodeType::PromptInput
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        match &node.data {
            NodeData::PromptInput(data) if !data.text.trim().is_empty() => ValidationResult::ok(),
            _ => ValidationResult::from_errors(vec!["Prompt text is empty".to_string()]),
        }
    }

    async fn execute(&self, node: &Node, _ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let text = node.data.text_output().unwrap_or_default().to_string();
        Ok(NodeExecutionResult::success(node.data.clone())
            .with_output(Self::OUTPUT_TEXT, serde_json::Value::String(text)))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::PromptInput,
    create: |_| Arc::new(PromptInputService),
});
