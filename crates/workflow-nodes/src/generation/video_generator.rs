//! Video Generator Service
//!
//! Video providers run jobs asynchronously: the service submits a task,
//! polls it until it settles and mirrors the provider's progress onto the
//! node. A failed or timed out job moves on to the next model in the
//! fallback chain.

use std::sync::Arc;

use async_trait::async_trait;
use model_router::VideoRequest;
use node_engine::{
    Artifact, ExecutionContext, FileType, Node, NodeExecutionResult, NodeService, NodeType, NodeVariant,
    Result, ServiceDeps, ServiceRegistration, ValidationResult, VideoGeneratorData,
};

use crate::generate::{cached_generation, first_non_empty, generate_video};

/// Prompt used for image-to-video when no text is given
const ANIMATE_PROMPT: &str = "Animate this image with natural, cinematic motion.";

pub struct VideoGeneratorService {
    deps: Arc<ServiceDeps>,
}

impl VideoGeneratorService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }

    fn prompt(data: &VideoGeneratorData, node_id: &str, ctx: &ExecutionContext) -> Option<String> {
        first_non_empty(data.prompt.as_deref(), ctx.upstream_text(node_id))
    }
}

#[async_trait]
impl NodeService for VideoGeneratorService {
    fn node_type(&self) -> NodeType {
        NodeType::VideoGenerator
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        let Some(data) = VideoGeneratorData::from_data(&node.data) else {
            return ValidationResult::from_errors(vec!["Node data is not video generator data".to_string()]);
        };
        if Self::prompt(data, &node.id, ctx).is_none() && ctx.upstream_images(&node.id).is_empty() {
            return ValidationResult::from_errors(vec![
                "Video generation needs a prompt or a connected image".to_string(),
            ]);
        }
        ValidationResult::ok()
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = VideoGeneratorData::from_data(&node.data).cloned().unwrap_or_default();
        let request = VideoRequest {
            prompt: Self::prompt(&data, &node.id, ctx).unwrap_or_else(|| ANIMATE_PROMPT.to_string()),
            reference_images: ctx.upstream_images(&node.id),
            duration_secs: data.duration_secs,
            aspect_ratio: data.aspect_ratio.clone(),
        };

        ctx.update_node_data::<VideoGeneratorData, _>(&node.id, |d| d.progress = 0.0)?;
        let node_id = node.id.as_str();
        let on_progress = |progress: f32| {
            if let Err(e) = ctx.update_node_data::<VideoGeneratorData, _>(node_id, |d| d.progress = progress) {
                log::warn!("Could not record progress for node '{}': {}", node_id, e);
            }
        };

        let deps = &self.deps;
        let model = data.model.as_deref();
        let sub_model = data.sub_model.as_deref();
        let request = &request;
        let on_progress: &(dyn Fn(f32) + Send + Sync) = &on_progress;
        let mut task_id = None;
        let task_slot = &mut task_id;
        let (artifacts, generation, from_cache) = cached_generation(deps, node, || async move {
            let (job, info) = generate_video(deps, node_id, model, sub_model, request, on_progress).await?;
            *task_slot = Some(job.task_id);
            Ok((vec![Artifact::url(FileType::Video, job.video_url)], info))
        })
        .await?;

        let video_url = artifacts
            .iter()
            .find_map(Artifact::as_url)
            .map(str::to_string)
            .ok_or_else(|| node_engine::NodeEngineError::failed("video artifact is missing its URL"))?;

        let updated = ctx.update_node_data::<VideoGeneratorData, _>(&node.id, |d| {
            d.video_url = Some(video_url.clone());
            d.progress = 100.0;
            if task_id.is_some() {
                d.task_id = task_id;
            }
            if generation.is_some() {
                d.generation = generation;
            }
        })?;

        Ok(NodeExecutionResult::success(updated.into())
            .with_output("videoUrl", serde_json::Value::String(video_url))
            .with_from_cache(from_cache))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::VideoGenerator,
    create: |deps| Arc::new(VideoGeneratorService::new(deps.clone())),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, Fixture, MockImageProvider, MockTextProvider, MockVideoProvider};
    use node_engine::{Connection, ImageGeneratorData, NodeData, NodeUpdate};

    fn video_node(prompt: Option<&str>) -> Node {
        let data = VideoGeneratorData {
            prompt: prompt.map(str::to_string),
            ..Default::default()
        };
        Node::new("vid", "Video", data.into())
    }

    fn video_data(ctx: &ExecutionContext) -> VideoGeneratorData {
        match ctx.node("vid").unwrap().data {
            NodeData::VideoGenerator(data) => data,
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_polls_until_done_and_reports_progress() {
        let fixture = Fixture::with(
            MockImageProvider::default(),
            MockTextProvider::default(),
            MockVideoProvider::new(3),
        );
        let node = video_node(Some("waves crashing at night"));
        let (ctx, sink) = context(vec![node.clone()], Vec::new());

        let result = VideoGeneratorService::new(fixture.deps.clone()).execute_node(&node, &ctx).await;
        assert!(result.success, "{:?}", result.error);

        let data = video_data(&ctx);
        assert_eq!(data.video_url.as_deref(), Some("https://video/sora-2-task-1.mp4"));
        assert_eq!(data.task_id.as_deref(), Some("sora-2-task-1"));
        assert_eq!(data.progress, 100.0);

        let reported: Vec<f32> = sink
            .updates()
            .into_iter()
            .filter_map(|u| match u {
                NodeUpdate::Data { data: NodeData::VideoGenerator(d), .. } => Some(d.progress),
                _ => None,
            })
            .collect();
        assert!(reported.contains(&25.0) && reported.contains(&50.0));
    }

    #[tokio::test]
    async fn test_failed_job_falls_back_to_next_model() {
        let fixture = Fixture::with(
            MockImageProvider::default(),
            MockTextProvider::default(),
            MockVideoProvider::new(1).failing("sora-2", "content policy violation"),
        );
        let node = video_node(Some("a duel at sunrise"));
        let (ctx, _) = context(vec![node.clone()], Vec::new());

        let result = VideoGeneratorService::new(fixture.deps.clone()).execute_node(&node, &ctx).await;
        assert!(result.success, "{:?}", result.error);

        let generation = video_data(&ctx).generation.unwrap();
        assert_eq!(generation.model_used, "veo-3.1-fast-generate-preview");
        assert_eq!(generation.fallback_chain, vec!["sora-2", "veo-3.1-fast-generate-preview"]);
        assert_eq!(fixture.video.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_image_only_input_uses_animate_prompt() {
        let fixture = Fixture::new();
        let image = ImageGeneratorData {
            images: vec!["https://img/still.png".to_string()],
            ..Default::default()
        };
        let upstream = Node::new("img", "Still", image.into());
        let node = video_node(None);
        let (ctx, _) = context(vec![upstream, node.clone()], vec![Connection::new("img", "vid")]);

        let result = VideoGeneratorService::new(fixture.deps.clone()).execute_node(&node, &ctx).await;
        assert!(result.success, "{:?}", result.error);

        let submissions = fixture.video.submissions.lock();
        assert_eq!(submissions[0].1.prompt, ANIMATE_PROMPT);
        assert_eq!(submissions[0].1.reference_images, vec!["https://img/still.png".to_string()]);
    }

    #[tokio::test]
    async fn test_no_prompt_and_no_image_is_invalid() {
        let fixture = Fixture::new();
        let node = video_node(None);
        let (ctx, _) = context(vec![node.clone()], Vec::new());

        let result = VideoGeneratorService::new(fixture.deps.clone()).execute_node(&node, &ctx).await;
        assert!(!result.success);
        assert_eq!(fixture.video.submission_count(), 0);
    }
}
