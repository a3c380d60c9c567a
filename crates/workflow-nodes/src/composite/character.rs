//! Character Service
//!
//! Designs every entity listed on the node in three stages: a written
//! profile, an expression sheet and a three-view turnaround that uses the
//! expression sheet as its reference. Each entity runs on its own owner
//! queue under `nodeId|entityName`, so entities proceed in parallel while
//! repeated triggers for one entity never overlap.
//!
//! Stages already present in the node data are skipped, which lets a
//! partially failed run resume where it stopped.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use model_router::{ImageOptions, TextRequest};
use node_engine::{
    CharacterData, CharacterProfile, CharacterStage, ExecutionContext, GenerationKey, Node,
    NodeEngineError, NodeExecutionResult, NodeService, NodeType, NodeVariant, Result, ServiceDeps,
    ServiceRegistration, ValidationResult,
};

use crate::generate::{generate_images, generate_text};

const PROFILE_SYSTEM_PROMPT: &str = "You are a character designer for a short drama. Write a concise \
profile for the named character: age, build, face, hair, wardrobe, personality and a signature \
visual detail. Plain prose, no headings.";

pub struct CharacterService {
    deps: Arc<ServiceDeps>,
}

impl CharacterService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }
}

/// Entity names with blanks and duplicates removed, in listed order
fn entity_names(data: &CharacterData) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in data.entities.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn stage_output(profile: &CharacterProfile, stage: CharacterStage) -> Option<&String> {
    match stage {
        CharacterStage::Profile => profile.profile.as_ref(),
        CharacterStage::ExpressionSheet => profile.expression_sheet.as_ref(),
        CharacterStage::ThreeView => profile.three_view_sheet.as_ref(),
    }
}

fn set_stage_output(profile: &mut CharacterProfile, stage: CharacterStage, output: String) {
    match stage {
        CharacterStage::Profile => profile.profile = Some(output),
        CharacterStage::ExpressionSheet => profile.expression_sheet = Some(output),
        CharacterStage::ThreeView => profile.three_view_sheet = Some(output),
    }
}

/// One entity's run through the stages; owns everything it needs so it
/// can be queued
struct EntityJob {
    deps: Arc<ServiceDeps>,
    ctx: ExecutionContext,
    key: GenerationKey,
    node_id: String,
    name: String,
    story: Option<String>,
    references: Vec<String>,
    text_model: Option<String>,
    image_model: Option<String>,
}

impl EntityJob {
    /// The entity's profile as the node holds it now. Read when the job
    /// starts, so a job queued behind another sees that job's stages.
    fn current_profile(&self) -> Option<CharacterProfile> {
        let node = self.ctx.node(&self.node_id)?;
        CharacterData::from_data(&node.data)?.character(&self.name).cloned()
    }

    async fn run(self) -> std::result::Result<CharacterProfile, String> {
        let mut profile = self
            .current_profile()
            .unwrap_or_else(|| CharacterProfile::new(&self.name));
        profile.error = None;

        for stage in CharacterStage::ALL {
            if let Some(output) = stage_output(&profile, stage).cloned() {
                log::debug!("'{}' already has a {}, skipping", self.key, stage.as_str());
                self.deps.generation_state.update(&self.key, |s| s.set_success(stage, output));
                continue;
            }

            self.deps.generation_state.update(&self.key, |s| s.set_generating(stage));
            match self.generate_stage(stage, &profile).await {
                Ok(output) => {
                    self.deps
                        .generation_state
                        .update(&self.key, |s| s.set_success(stage, output.clone()));
                    set_stage_output(&mut profile, stage, output);
                    self.publish(&profile);
                }
                Err(e) => {
                    let message = format!("{} failed: {}", stage.as_str(), e);
                    log::warn!("Character '{}': {}", self.key, message);
                    self.deps
                        .generation_state
                        .update(&self.key, |s| s.set_failed(stage, message.clone()));
                    profile.error = Some(message.clone());
                    self.publish(&profile);
                    return Err(message);
                }
            }
        }

        log::info!("Character '{}' complete", self.key);
        Ok(profile)
    }

    /// Write this entity's profile into the node without touching siblings
    fn publish(&self, profile: &CharacterProfile) {
        let result = self.ctx.update_node_data::<CharacterData, _>(&self.node_id, |d| {
            *d.character_mut(&self.name) = profile.clone();
        });
        if let Err(e) = result {
            log::warn!("Could not update character '{}': {}", self.key, e);
        }
    }

    async fn generate_stage(&self, stage: CharacterStage, profile: &CharacterProfile) -> Result<String> {
        let description = profile.profile.as_deref().unwrap_or(&self.name);
        match stage {
            CharacterStage::Profile => {
                let prompt = match &self.story {
                    Some(story) => format!("Character: {}\n\nStory:\n{}", self.name, story),
                    None => format!("Character: {}", self.name),
                };
                let request = TextRequest {
                    system_prompt: Some(PROFILE_SYSTEM_PROMPT.to_string()),
                    prompt,
                    json_output: false,
                };
                let (text, _) = generate_text(&self.deps, self.text_model.as_deref(), &request).await?;
                Ok(text.trim().to_string())
            }
            CharacterStage::ExpressionSheet => {
                let prompt = format!(
                    "Expression sheet of {}: a 3x3 grid of head shots showing neutral, happy, sad, \
                     angry, surprised, afraid, disgusted, thoughtful and determined expressions on a \
                     plain background.\n\n{}",
                    self.name, description
                );
                self.single_image(&prompt, &self.references).await
            }
            CharacterStage::ThreeView => {
                let sheet = profile
                    .expression_sheet
                    .clone()
                    .ok_or_else(|| NodeEngineError::failed("expression sheet is missing"))?;
                let prompt = format!(
                    "Character turnaround of {}: full body front, side and back views side by side, \
                     neutral pose, plain background, consistent with the reference.\n\n{}",
                    self.name, description
                );
                self.single_image(&prompt, &[sheet]).await
            }
        }
    }

    async fn single_image(&self, prompt: &str, references: &[String]) -> Result<String> {
        let options = ImageOptions {
            aspect_ratio: Some("16:9".to_string()),
            count: 1,
        };
        let (urls, _) = generate_images(&self.deps, self.image_model.as_deref(), prompt, references, &options).await?;
        urls.into_iter()
            .next()
            .ok_or_else(|| NodeEngineError::failed("image model returned no images"))
    }
}

#[async_trait]
impl NodeService for CharacterService {
    fn node_type(&self) -> NodeType {
        NodeType::Character
    }

    fn validate_inputs(&self, node: &Node, _ctx: &ExecutionContext) -> ValidationResult {
        match CharacterData::from_data(&node.data) {
            Some(data) if !entity_names(data).is_empty() => ValidationResult::ok(),
            _ => ValidationResult::from_errors(vec!["List at least one character to design".to_string()]),
        }
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = CharacterData::from_data(&node.data).cloned().unwrap_or_default();
        let names = entity_names(&data);
        let story = ctx.upstream_text(&node.id);
        let references = ctx.upstream_images(&node.id);

        let mut handles = Vec::with_capacity(names.len());
        for name in &names {
            let key = GenerationKey::new(&node.id, name);
            let job = EntityJob {
                deps: self.deps.clone(),
                ctx: ctx.clone(),
                key: key.clone(),
                node_id: node.id.clone(),
                name: name.clone(),
                story: story.clone(),
                references: references.clone(),
                text_model: data.text_model.clone(),
                image_model: data.image_model.clone(),
            };
            handles.push(self.deps.queue.enqueue(key.as_str(), job.run()).await?);
        }

        let mut failed = Vec::new();
        for (name, outcome) in names.iter().zip(join_all(handles.into_iter().map(|h| h.wait())).await) {
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => failed.push(name.clone()),
                Err(e) => {
                    log::error!("Character job for '{}' did not finish: {}", name, e);
                    failed.push(name.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Ok(NodeExecutionResult::failure(format!(
                "Character generation failed for: {}",
                failed.join(", ")
            )));
        }

        let updated = ctx
            .node(&node.id)
            .and_then(|n| CharacterData::from_data(&n.data).cloned())
            .ok_or_else(|| NodeEngineError::NodeNotFound(node.id.clone()))?;
        let sheets: Vec<String> = updated
            .characters
            .iter()
            .filter_map(|c| c.three_view_sheet.clone())
            .collect();
        Ok(NodeExecutionResult::success(updated.into()).with_output("images", serde_json::to_value(sheets)?))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::Character,
    create: |deps| Arc::new(CharacterService::new(deps.clone())),
});
