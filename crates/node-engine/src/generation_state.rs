//! Multi-stage generation state
//!
//! A character node designs several entities, each in three stages.
//! State is keyed by `nodeId|entityName` so concurrent generations for
//! different entities on the same node never overwrite each other.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Composite key `nodeId|entityName`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationKey(String);

impl GenerationKey {
    pub const SEPARATOR: char = '|';

    pub fn new(node_id: &str, entity: &str) -> Self {
        Self(format!("{}{}{}", node_id, Self::SEPARATOR, entity))
    }

    pub fn node_id(&self) -> &str {
        self.0.split_once(Self::SEPARATOR).map_or(self.0.as_str(), |(node, _)| node)
    }

    pub fn entity(&self) -> &str {
        self.0.split_once(Self::SEPARATOR).map_or("", |(_, entity)| entity)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix shared by every key of a node
    pub fn node_prefix(node_id: &str) -> String {
        format!("{}{}", node_id, Self::SEPARATOR)
    }
}

impl fmt::Display for GenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stages of a character design, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterStage {
    Profile,
    ExpressionSheet,
    ThreeView,
}

impl CharacterStage {
    pub const ALL: [CharacterStage; 3] = [Self::Profile, Self::ExpressionSheet, Self::ThreeView];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::ExpressionSheet => "expression_sheet",
            Self::ThreeView => "three_view",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Generating,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub status: StageStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// State of one entity's generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterGenerationState {
    pub key: GenerationKey,
    pub profile: StageState,
    pub expression_sheet: StageState,
    pub three_view: StageState,
}

impl CharacterGenerationState {
    pub fn new(key: GenerationKey) -> Self {
        Self {
            key,
            profile: StageState::default(),
            expression_sheet: StageState::default(),
            three_view: StageState::default(),
        }
    }

    pub fn stage(&self, stage: CharacterStage) -> &StageState {
        match stage {
            CharacterStage::Profile => &self.profile,
            CharacterStage::ExpressionSheet => &self.expression_sheet,
            CharacterStage::ThreeView => &self.three_view,
        }
    }

    pub fn stage_mut(&mut self, stage: CharacterStage) -> &mut StageState {
        match stage {
            CharacterStage::Profile => &mut self.profile,
            CharacterStage::ExpressionSheet => &mut self.expression_sheet,
            CharacterStage::ThreeView => &mut self.three_view,
        }
    }

    pub fn set_generating(&mut self, stage: CharacterStage) {
        let state = self.stage_mut(stage);
        state.status = StageStatus::Generating;
        state.error = None;
        state.updated_at = Some(Utc::now());
    }

    pub fn set_success(&mut self, stage: CharacterStage, output: impl Into<String>) {
        let state = self.stage_mut(stage);
        state.status = StageStatus::Success;
        state.output = Some(output.into());
        state.error = None;
        state.updated_at = Some(Utc::now());
    }

    pub fn set_failed(&mut self, stage: CharacterStage, error: impl Into<String>) {
        let state = self.stage_mut(stage);
        state.status = StageStatus::Failed;
        state.error = Some(error.into());
        state.updated_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        CharacterStage::ALL
            .iter()
            .all(|s| self.stage(*s).status == StageStatus::Success)
    }
}

/// Shared store of per-entity generation state
#[derive(Default)]
pub struct GenerationStateStore {
    states: Mutex<HashMap<GenerationKey, CharacterGenerationState>>,
}

impl GenerationStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &GenerationKey) -> Option<CharacterGenerationState> {
        self.states.lock().get(key).cloned()
    }

    /// Read-modify-write one entry under the store lock, creating it if
    /// needed. Returns the updated state.
    pub fn update<F>(&self, key: &GenerationKey, update: F) -> CharacterGenerationState
    where
        F: FnOnce(&mut CharacterGenerationState),
    {
        let mut states = self.states.lock();
        let state = states
            .entry(key.clone())
            .or_insert_with(|| CharacterGenerationState::new(key.clone()));
        update(state);
        state.clone()
    }

    /// States for every entity of a node, ordered by entity name
    pub fn list_for_node(&self, node_id: &str) -> Vec<CharacterGenerationState> {
        let mut states: Vec<_> = self
            .states
            .lock()
            .values()
            .filter(|s| s.key.node_id() == node_id)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }

    pub fn remove(&self, key: &GenerationKey) -> Option<CharacterGenerationState> {
        self.states.lock().remove(key)
    }

    /// Drop every entity's state for a node
    pub fn remove_node(&self, node_id: &str) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|key, _| key.node_id() != node_id);
        before - states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_key_parts() {
        let key = GenerationKey::new("node-1", "Mei Ling");
        assert_eq!(key.as_str(), "node-1|Mei Ling");
        assert_eq!(key.node_id(), "node-1");
        assert_eq!(key.entity(), "Mei Ling");
    }

    #[test]
    fn test_stages_are_independent() {
        let store = GenerationStateStore::new();
        let key = GenerationKey::new("n", "Mei");

        store.update(&key, |s| s.set_success(CharacterStage::Profile, "tall, quiet"));
        let state = store.update(&key, |s| s.set_failed(CharacterStage::ExpressionSheet, "quota"));

        assert_eq!(state.profile.status, StageStatus::Success);
        assert_eq!(state.expression_sheet.status, StageStatus::Failed);
        assert_eq!(state.three_view.status, StageStatus::Pending);
        assert!(!state.is_complete());
    }

    #[test]
    fn test_entities_do_not_overwrite_each_other() {
        let store = Arc::new(GenerationStateStore::new());

        let handles: Vec<_> = ["Mei", "Jun", "Hana", "Kai"]
            .into_iter()
            .map(|name| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let key = GenerationKey::new("n", name);
                    for stage in CharacterStage::ALL {
                        store.update(&key, |s| s.set_generating(stage));
                        store.update(&key, |s| s.set_success(stage, format!("{name}-{}", stage.as_str())));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let states = store.list_for_node("n");
        assert_eq!(states.len(), 4);
        for state in states {
            assert!(state.is_complete());
            assert_eq!(
                state.three_view.output.as_deref(),
                Some(format!("{}-three_view", state.key.entity()).as_str())
            );
        }
        assert_eq!(store.remove_node("n"), 4);
    }
}
