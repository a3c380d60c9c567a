//! Script Planner Service
//!
//! Turns a story idea into a script and a shot list with a text model.
//! The model is asked for JSON; replies that are not JSON are kept as a
//! plain script with no shots.

use std::sync::Arc;

use async_trait::async_trait;
use model_router::TextRequest;
use node_engine::{
    Artifact, ExecutionContext, Node, NodeData, NodeExecutionResult, NodeService, NodeType,
    NodeVariant, Result, ScriptPlannerData, ServiceDeps, ServiceRegistration, Shot, ValidationResult,
};
use serde::Deserialize;

use crate::generate::{cached_generation, first_non_empty, generate_text};

const DEFAULT_SHOT_COUNT: u32 = 6;

pub struct ScriptPlannerService {
    deps: Arc<ServiceDeps>,
}

impl ScriptPlannerService {
    pub fn new(deps: Arc<ServiceDeps>) -> Self {
        Self { deps }
    }

    fn idea(node: &Node, ctx: &ExecutionContext) -> Option<String> {
        let own = match &node.data {
            NodeData::ScriptPlanner(data) => data.idea.as_deref(),
            _ => None,
        };
        first_non_empty(own, ctx.upstream_text(&node.id))
    }
}

fn system_prompt(shot_count: u32) -> String {
    format!(
        "You are a screenwriter for short AI-generated dramas. Expand the user's idea into a script \
         and split it into exactly {shot_count} shots. Reply with JSON only, shaped as \
         {{\"script\": string, \"shots\": [{{\"description\": string, \"dialogue\": string, \
         \"camera\": string, \"durationSecs\": number}}]}}."
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedScript {
    #[serde(default)]
    script: String,
    #[serde(default)]
    shots: Vec<PlannedShot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedShot {
    id: Option<String>,
    #[serde(default)]
    description: String,
    dialogue: Option<String>,
    camera: Option<String>,
    duration_secs: Option<u32>,
}

/// Strip a surrounding markdown code fence, if the model added one
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply into a script and its shots
pub(crate) fn parse_script(raw: &str) -> (String, Vec<Shot>) {
    match serde_json::from_str::<PlannedScript>(strip_code_fence(raw)) {
        Ok(planned) => {
            let shots = planned
                .shots
                .into_iter()
                .filter(|s| !s.description.trim().is_empty())
                .enumerate()
                .map(|(i, s)| Shot {
                    id: s
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| format!("shot-{}", i + 1)),
                    description: s.description,
                    dialogue: s.dialogue.filter(|d| !d.trim().is_empty()),
                    camera: s.camera.filter(|c| !c.trim().is_empty()),
                    duration_secs: s.duration_secs,
                })
                .collect();
            (planned.script, shots)
        }
        Err(e) => {
            log::debug!("Script reply is not JSON ({}), keeping it as plain text", e);
            (raw.trim().to_string(), Vec::new())
        }
    }
}

#[async_trait]
impl NodeService for ScriptPlannerService {
    fn node_type(&self) -> NodeType {
        NodeType::ScriptPlanner
    }

    fn validate_inputs(&self, node: &Node, ctx: &ExecutionContext) -> ValidationResult {
        if Self::idea(node, ctx).is_none() {
            return ValidationResult::from_errors(vec![
                "Script planner needs an idea or a connected prompt".to_string(),
            ]);
        }
        ValidationResult::ok()
    }

    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<NodeExecutionResult> {
        let data = ScriptPlannerData::from_data(&node.data).cloned().unwrap_or_default();
        let idea = Self::idea(node, ctx).unwrap_or_default();
        let request = TextRequest {
            system_prompt: Some(system_prompt(data.shot_count.unwrap_or(DEFAULT_SHOT_COUNT))),
            prompt: idea,
            json_output: true,
        };

        let deps = &self.deps;
        let model = data.model.as_deref();
        let request = &request;
        let (artifacts, generation, from_cache) = cached_generation(deps, node, || async move {
            let (raw, info) = generate_text(deps, model, request).await?;
            Ok((vec![Artifact::text(raw)], info))
        })
        .await?;

        let raw = artifacts.iter().find_map(Artifact::as_text).unwrap_or_default();
        let (script, shots) = parse_script(raw);
        log::info!("Planned {} shots for node '{}'", shots.len(), node.id);

        let shots_value = serde_json::to_value(&shots)?;
        let updated = ctx.update_node_data::<ScriptPlannerData, _>(&node.id, |d| {
            d.script = Some(script.clone());
            d.shots = shots;
            if generation.is_some() {
                d.generation = generation;
            }
        })?;

        Ok(NodeExecutionResult::success(updated.into())
            .with_output("script", serde_json::Value::String(script))
            .with_output("shots", shots_value)
            .with_from_cache(from_cache))
    }
}

inventory::submit!(ServiceRegistration {
    node_type: NodeType::ScriptPlanner,
    create: |deps| Arc::new(ScriptPlannerService::new(deps.clone())),
});
