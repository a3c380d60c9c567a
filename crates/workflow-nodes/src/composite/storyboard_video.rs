//! Storyboard Video Service
//!
//! Walks a storyboard through its phases, one phase per execution:
//!
//! - `Idle`: collect candidate shots from connected script planners
//! - `Selecting`: settle the selection (an empty selection means every shot)
//! - `Prompting`: write one video prompt per selected shot
//! - `Generating`: render a clip per prompt, saving each as it lands
//! - `Completed`: nothing left to do
//!
//! A failure while generating leaves the node in `Generating` with the
//! clips finished so far, so the next execution picks up the rest.

use std::sync::Arc;

use async_trait::async_trait;
use model_router::VideoRequest;
use node_engine::{
    ExecutionContext, Node, NodeEngineError, NodeExecutionResult, NodeService, NodeType, NodeVariant,
    Result, ServiceDeps, ServiceRegistration, Shot, ShotClip, ShotPrompt, StoryboardPhase,
    StoryboardVideoData, ValidationResult,
};

use crate::generate::generate_video;

pub struct StoryboardVideoService {
    deps: Arc<ServiceDeps>,
}

impl StoryboardVideoService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }

    fn collect_candidates(&self, node: &Node, ctx: &ExecutionContext) -> Result<StoryboardVideoData> {
        let candidates = ctx.upstream_shots(&node.id);
        if candidates.is_empty() {
            return Err(NodeEngineError::failed("No shots found on connected script planners"));
        }
        log::info!("Storyboard '{}' has {} candidate shots", node.id, candidates.len());
        ctx.update_node_data::<StoryboardVideoData, _>(&node.id, |d| {
            d.candidates = candidates;
            d.status = StoryboardPhase::Selecting;
        })
    }

    fn settle_selection(&self, node: &Node, ctx: &ExecutionContext) -> Result<StoryboardVideoData> {
        ctx.update_node_data::<StoryboardVideoData, _>(&node.id, |d| {
            let known: Vec<String> = d
                .selected_shot_ids
                .iter()
                .filter(|id| d.candidates.iter().any(|s| &s.id == *id))
                .cloned()
                .collect();
            d.selected_shot_ids = if known.is_empty() {
                d.candidates.iter().map(|s| s.id.clone()).collect()
            } else {
                known
            };
            d.status = StoryboardPhase::Prompting;
        })
    }

    fn write_prompts(&self, node: &Node, ctx: &ExecutionContext) -> Result<StoryboardVideoData> {
        ctx.update_node_data::<StoryboardVideoData, _>(&node.id, |d| {
            let style = d.style.clone();
            d.prompts = d
                .selected_shot_ids
                .iter()
                .filter_map(|id| d.candidates.iter().find(|s| &s.id == id))
                .map(|shot| ShotPrompt {
                    shot_id: shot.id.clone(),
                    prompt: shot_prompt(shot, style.as_deref()),
                })
                .collect();
            d.clips.retain(|c| d.prompts.iter().any(|p| p.shot_id == c.shot_id));
            d.status = StoryboardPhase::Generating;
        })
    }

    async fn generate_clips(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
        data: &StoryboardVideoData,
    ) -> Result<StoryboardVideoData> {
        let node_id = node.id.as_str();
        let on_progress = |progress: f32| log::trace!("Storyboard '{}' clip at {}%", node_id, progress);

        for shot in &data.prompts {
            if data.clips.iter().any(|c| c.shot_id == shot.shot_id) {
                continue;
            }
            let request = VideoRequest {
                prompt: shot.prompt.clone(),
                ..Default::default()
            };
            let (job, info) = generate_video(
                &self.deps,
                node_id,
                data.model.as_deref(),
                None,
                &request,
                &on_progress,
            )
            .await?;
            log::info!("Storyboard '{}' rendered shot '{}' on {}", node_id, shot.shot_id, info.model_used);
            ctx.update_node_data::<StoryboardVideoData, _>(node_id, |d| {
                d.clips.push(ShotClip {
                    shot_id: shot.shot_id.clone(),
                    video_url: job.video_url,
                    model_used: info.model_used,
                });
            })?;
        }

        ctx.update_node_data::<StoryboardVideoData, _>(node_id, |d| d.status = StoryboardPhase::Completed)
    }
}

/// Video prompt for one shot
fn shot_prompt(shot: &Shot, style: Option<&str>) -> String {
    let mut prompt = shot.description.trim().to_string();
    if let Some(camera) = &shot.camera {
        prompt.push_str(&format!(" Camera: {}.", camera.trim()));
    }
    if let Some(dialogue) = &shot.dialogue {
        prompt.push_str(&format!(" Dialogue: \"{}\".", dialogue.trim()));
    }
    if let Some(style) = style.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str(&format!(" Style: {}.", style));
    }
    prompt
}

#[async_trait]
impl NodeService for StoryboardVideoService {
    fn node_type(&self) -> NodeType {
        NodeType::StoryboardVideoGenerator
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        let Some(data) = StoryboardVideoData::from_data(&node.data) else {
            return ValidationResult::from_errors(vec!["Node data is not storyboard data".to_string()]);
        };
        let missing = match data.status {
            StoryboardPhase::Idle => !ctx.has_upstream(&node.id),
            StoryboardPhase::Selecting => data.candidates.is_empty(),
            StoryboardPhase::Prompting => data.selected_shot_ids.is_empty(),
            StoryboardPhase::Generating => data.prompts.is_empty(),
            StoryboardPhase::Completed => false,
        };
        if missing {
            return ValidationResult::from_errors(vec![format!(
                "Storyboard has nothing to work on in phase {:?}",
                data.status
            )]);
        }
        ValidationResult::ok()
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = StoryboardVideoData::from_data(&node.data).cloned().unwrap_or_default();
        log::debug!("Storyboard '{}' executing phase {:?}", node.id, data.status);

        let updated = match data.status {
            StoryboardPhase::Idle => self.collect_candidates(node, ctx)?,
            StoryboardPhase::Selecting => self.settle_selection(node, ctx)?,
            StoryboardPhase::Prompting => self.write_prompts(node, ctx)?,
            StoryboardPhase::Generating => self.generate_clips(node, ctx, &data).await?,
            StoryboardPhase::Completed => data,
        };

        let clips: Vec<&str> = updated.clips.iter().map(|c| c.video_url.as_str()).collect();
        let clips_value = serde_json::to_value(clips)?;
        Ok(NodeExecutionResult::success(updated.into()).with_output("clips", clips_value))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::StoryboardVideoGenerator,
    create: |deps| Arc::new(StoryboardVideoService::new(deps.clone())),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, Fixture, MockImageProvider, MockTextProvider, MockVideoProvider};
    use node_engine::{Connection, NodeData, NodeStatus, ScriptPlannerData};

    fn graph(storyboard: StoryboardVideoData) -> (Vec<Node>, Vec<Connection>) {
        let mut opening = Shot::new("shot-1", "A train pulls into a foggy station");
        opening.camera = Some("wide".to_string());
        let script = ScriptPlannerData {
            script: Some("The stranger arrives.".to_string()),
            shots: vec![opening, Shot::new("shot-2", "A stranger steps onto the platform")],
            ..Default::default()
        };
        let nodes = vec![
            Node::new("script", "Script", script.into()),
            Node::new("board", "Storyboard", storyboard.into()),
        ];
        (nodes, vec![Connection::new("script", "board")])
    }

    fn board(ctx: &ExecutionContext) -> StoryboardVideoData {
        match ctx.node("board").unwrap().data {
            NodeData::StoryboardVideoGenerator(data) => data,
            other => panic!("unexpected data {:?}", other),
        }
    }

    async fn step(service: &StoryboardVideoService, ctx: &ExecutionContext) -> NodeExecutionResult {
        let node = ctx.node("board").unwrap();
        service.execute_node(&node, ctx).await
    }

    #[test]
    fn test_shot_prompt_includes_camera_and_style() {
        let mut shot = Shot::new("s", "Rain on a window");
        shot.camera = Some("macro".to_string());
        assert_eq!(
            shot_prompt(&shot, Some("noir")),
            "Rain on a window Camera: macro. Style: noir."
        );
    }

    #[tokio::test]
    async fn test_walks_every_phase_in_order() {
        let fixture = Fixture::with(
            MockImageProvider::default(),
            MockTextProvider::default(),
            MockVideoProvider::new(1),
        );
        let storyboard = StoryboardVideoData {
            style: Some("35mm film".to_string()),
            ..Default::default()
        };
        let (nodes, connections) = graph(storyboard);
        let (ctx, _) = context(nodes, connections);
        let service = StoryboardVideoService::new(fixture.deps.clone());

        assert!(step(&service, &ctx).await.success);
        assert_eq!(board(&ctx).status, StoryboardPhase::Selecting);
        assert_eq!(board(&ctx).candidates.len(), 2);

        assert!(step(&service, &ctx).await.success);
        assert_eq!(board(&ctx).status, StoryboardPhase::Prompting);
        assert_eq!(board(&ctx).selected_shot_ids, vec!["shot-1", "shot-2"]);

        assert!(step(&service, &ctx).await.success);
        let prompted = board(&ctx);
        assert_eq!(prompted.status, StoryboardPhase::Generating);
        assert_eq!(
            prompted.prompts[0].prompt,
            "A train pulls into a foggy station Camera: wide. Style: 35mm film."
        );

        let generated = step(&service, &ctx).await;
        assert!(generated.success, "{:?}", generated.error);
        let done = board(&ctx);
        assert_eq!(done.status, StoryboardPhase::Completed);
        assert_eq!(done.clips.len(), 2);
        assert_eq!(fixture.video.submission_count(), 2);

        // Terminal phase is a no-op success
        let again = step(&service, &ctx).await;
        assert!(again.success);
        assert_eq!(fixture.video.submission_count(), 2);
        assert_eq!(board(&ctx).status, StoryboardPhase::Completed);
    }

    #[tokio::test]
    async fn test_selection_limits_prompts() {
        let fixture = Fixture::new();
        let storyboard = StoryboardVideoData {
            status: StoryboardPhase::Idle,
            selected_shot_ids: vec!["shot-2".to_string(), "missing".to_string()],
            ..Default::default()
        };
        let (nodes, connections) = graph(storyboard);
        let (ctx, _) = context(nodes, connections);
        let service = StoryboardVideoService::new(fixture.deps.clone());

        step(&service, &ctx).await;
        step(&service, &ctx).await;
        step(&service, &ctx).await;

        let data = board(&ctx);
        assert_eq!(data.selected_shot_ids, vec!["shot-2"]);
        assert_eq!(data.prompts.len(), 1);
        assert_eq!(data.prompts[0].shot_id, "shot-2");
    }

    #[tokio::test]
    async fn test_failed_generation_stays_in_generating() {
        let video = MockVideoProvider::new(1)
            .failing("sora-2", "500")
            .failing("veo-3.1-fast-generate-preview", "500")
            .failing("wan2.5-i2v-preview", "500");
        let fixture = Fixture::with(MockImageProvider::default(), MockTextProvider::default(), video);
        let storyboard = StoryboardVideoData {
            status: StoryboardPhase::Generating,
            prompts: vec![ShotPrompt {
                shot_id: "shot-1".to_string(),
                prompt: "A train pulls in".to_string(),
            }],
            ..Default::default()
        };
        let (nodes, connections) = graph(storyboard);
        let (ctx, sink) = context(nodes, connections);
        let service = StoryboardVideoService::new(fixture.deps.clone());

        let result = step(&service, &ctx).await;
        assert!(!result.success);
        assert_eq!(board(&ctx).status, StoryboardPhase::Generating);
        assert!(board(&ctx).clips.is_empty());
        assert_eq!(sink.statuses("board").last(), Some(&NodeStatus::Error));
    }

    #[tokio::test]
    async fn test_idle_without_upstream_is_invalid() {
        let fixture = Fixture::new();
        let node = Node::new("board", "Storyboard", NodeData::empty(NodeType::StoryboardVideoGenerator));
        let (ctx, _) = context(vec![node], Vec::new());

        let result = step(&StoryboardVideoService::new(fixture.deps.clone()), &ctx).await;
        assert!(!result.success);
        assert_eq!(board(&ctx).status, StoryboardPhase::Idle);
    }
}
