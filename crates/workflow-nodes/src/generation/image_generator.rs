//! Image Generator Service
//!
//! Text-to-image with optional reference images taken from upstream image
//! and character nodes. The prompt comes from the node itself or from
//! connected text nodes.

use std::sync::Arc;

use async_trait::async_trait;
use model_router::ImageOptions;
use node_engine::{
    Artifact, ExecutionContext, FileType, ImageGeneratorData, Node, NodeExecutionResult, NodeService,
    NodeType, NodeVariant, Result, ServiceDeps, ServiceRegistration, ValidationResult,
};

use crate::generate::{cached_generation, first_non_empty, generate_images};

pub struct ImageGeneratorService {
    deps: Arc<ServiceDeps>,
}

impl ImageGeneratorService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }

    fn prompt(data: &ImageGeneratorData, node_id: &str, ctx: &ExecutionContext) -> Option<String> {
        first_non_empty(data.prompt.as_deref(), ctx.upstream_text(node_id))
    }
}

#[async_trait]
impl NodeService for ImageGeneratorService {
    fn node_type(&self) -> NodeType {
        NodeType::ImageGenerator
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        let mut errors = Vec::new();
        match ImageGeneratorData::from_data(&node.data) {
            Some(data) => {
                if Self::prompt(data, &node.id, ctx).is_none() {
                    errors.push("A prompt is required: enter one or connect a text node".to_string());
                }
                if data.count == Some(0) {
                    errors.push("Image count must be at least 1".to_string());
                }
            }
            None => errors.push("Node data is not image generator data".to_string()),
        }
        ValidationResult::from_errors(errors)
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = ImageGeneratorData::from_data(&node.data).cloned().unwrap_or_default();
        let prompt = Self::prompt(&data, &node.id, ctx).unwrap_or_default();
        let references = ctx.upstream_images(&node.id);
        let options = ImageOptions {
            aspect_ratio: data.aspect_ratio.clone(),
            count: data.count.unwrap_or(1),
        };

        let deps = &self.deps;
        let model = data.model.as_deref();
        let (prompt, references, options) = (&prompt, &references, &options);
        let (artifacts, generation, from_cache) = cached_generation(deps, node, || async move {
            let (urls, info) = generate_images(deps, model, prompt, references, options).await?;
            let artifacts = urls.into_iter().map(|url| Artifact::url(FileType::Image, url)).collect();
            Ok((artifacts, info))
        })
        .await?;

        let images: Vec<String> = artifacts
            .iter()
            .filter_map(Artifact::as_url)
            .map(str::to_string)
            .collect();
        log::info!(
            "Image node '{}' produced {} images{}",
            node.id,
            images.len(),
            if from_cache { " (cached)" } else { "" }
        );

        let images_value = serde_json::to_value(&images)?;
        let updated = ctx.update_node_data::<ImageGeneratorData, _>(&node.id, |d| {
            d.images = images;
            if generation.is_some() {
                d.generation = generation;
            }
        })?;

        Ok(NodeExecutionResult::success(updated.into())
            .with_output("images", images_value)
            .with_from_cache(from_cache))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::ImageGenerator,
    create: |deps| Arc::new(ImageGeneratorService::new(deps.clone())),
});
