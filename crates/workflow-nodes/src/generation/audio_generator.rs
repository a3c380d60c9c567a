//! Audio Generator Service
//!
//! Speech or music from text written on the node or handed down by a
//! connected text node.

use std::sync::Arc;

use async_trait::async_trait;
use model_router::AudioRequest;
use node_engine::{
    Artifact, AudioGeneratorData, ExecutionContext, FileType, Node, NodeEngineError, NodeExecutionResult,
    NodeService, NodeType, NodeVariant, Result, ServiceDeps, ServiceRegistration, ValidationResult,
};

use crate::generate::{cached_generation, first_non_empty, generate_audio};

pub struct AudioGeneratorService {
    deps: Arc<ServiceDeps>,
}

impl AudioGeneratorService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }

    fn text(node: &Node, ctx: &ExecutionContext) -> Option<String> {
        let own = AudioGeneratorData::from_data(&node.data).and_then(|d| d.text.as_deref());
        first_non_empty(own, ctx.upstream_text(&node.id))
    }
}

#[async_trait]
impl NodeService for AudioGeneratorService {
    fn node_type(&self) -> NodeType {
        NodeType::AudioGenerator
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        if Self::text(node, ctx).is_none() {
            return ValidationResult::from_errors(vec!["Audio generation needs text to voice".to_string()]);
        }
        ValidationResult::ok()
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = AudioGeneratorData::from_data(&node.data).cloned().unwrap_or_default();
        let request = AudioRequest {
            text: Self::text(node, ctx).unwrap_or_default(),
            voice: data.voice.clone(),
        };

        let deps = &self.deps;
        let model = data.model.as_deref();
        let request = &request;
        let (artifacts, generation, from_cache) = cached_generation(deps, node, || async move {
            let (url, info) = generate_audio(deps, model, request).await?;
            Ok((vec![Artifact::url(FileType::Audio, url)], info))
        })
        .await?;

        let audio_url = artifacts
            .iter()
            .find_map(Artifact::as_url)
            .map(str::to_string)
            .ok_or_else(|| NodeEngineError::failed("audio artifact is missing its URL"))?;

        let updated = ctx.update_node_data::<AudioGeneratorData, _>(&node.id, |d| {
            d.audio_url = Some(audio_url.clone());
            if generation.is_some() {
                d.generation = generation;
            }
        })?;

        Ok(NodeExecutionResult::success(updated.into())
            .with_output("audioUrl", serde_json::Value::String(audio_url))
            .with_from_cache(from_cache))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::AudioGenerator,
    create: |deps| Arc::new(AudioGeneratorService::new(deps.clone())),
});
