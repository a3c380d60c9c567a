//! Typed node data
//!
//! Each node type owns its own field set. `NodeData` is tagged with the
//! node type on the wire, so a node's data can never be read as another
//! type's data.

use chrono::{DateTime, Utc};
use model_router::ModelId;
use serde::{Deserialize, Serialize};

use crate::types::NodeType;

/// Provenance of a generated artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInfo {
    /// Model that produced the artifact
    pub model_used: ModelId,
    /// Every model tried, skipped ones included
    #[serde(default)]
    pub fallback_chain: Vec<ModelId>,
    #[serde(default)]
    pub from_cache: bool,
    pub generated_at: DateTime<Utc>,
}

impl GenerationInfo {
    pub fn new(model_used: impl Into<String>, fallback_chain: Vec<ModelId>) -> Self {
        Self {
            model_used: model_used.into(),
            fallback_chain,
            from_cache: false,
            generated_at: Utc::now(),
        }
    }

    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }

    pub fn used_fallback(&self) -> bool {
        self.fallback_chain.len() > 1
    }
}

// =============================================================================
// Per-type data
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInputData {
    pub text: String,
}

impl PromptInputData {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One shot of a planned script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shot {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

impl Shot {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptPlannerData {
    /// Story idea; falls back to upstream text when empty
    #[serde(default)]
    pub idea: Option<String>,
    #[serde(default)]
    pub model: Option<ModelId>,
    /// Requested shot count
    #[serde(default)]
    pub shot_count: Option<u32>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub shots: Vec<Shot>,
    #[serde(default)]
    pub generation: Option<GenerationInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGeneratorData {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    /// Generated image URLs
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub generation: Option<GenerationInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGeneratorData {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<ModelId>,
    /// Provider-specific variant (e.g. a resolution tier)
    #[serde(default)]
    pub sub_model: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Last reported progress percentage
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub generation: Option<GenerationInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioGeneratorData {
    /// Text to speak; falls back to upstream text when empty
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub model: Option<ModelId>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub generation: Option<GenerationInfo>,
}

/// Designed character, filled stage by stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    /// Written profile (appearance, personality)
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub expression_sheet: Option<String>,
    #[serde(default)]
    pub three_view_sheet: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CharacterProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.profile.is_some() && self.expression_sheet.is_some() && self.three_view_sheet.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterData {
    /// Entity names to design
    #[serde(default)]
    pub entities: Vec<String>,
    /// Text model for the written profile
    #[serde(default)]
    pub text_model: Option<ModelId>,
    /// Image model for the sheets
    #[serde(default)]
    pub image_model: Option<ModelId>,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
}

impl CharacterData {
    pub fn character(&self, name: &str) -> Option<&CharacterProfile> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Get or insert the profile for `name`
    pub fn character_mut(&mut self, name: &str) -> &mut CharacterProfile {
        let pos = match self.characters.iter().position(|c| c.name == name) {
            Some(pos) => pos,
            None => {
                self.characters.push(CharacterProfile::new(name));
                self.characters.len() - 1
            }
        };
        &mut self.characters[pos]
    }
}

/// Phases of the storyboard video generator, advanced one per execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryboardPhase {
    #[default]
    Idle,
    Selecting,
    Prompting,
    Generating,
    Completed,
}

impl StoryboardPhase {
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::Selecting,
            Self::Selecting => Self::Prompting,
            Self::Prompting => Self::Generating,
            Self::Generating | Self::Completed => Self::Completed,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotPrompt {
    pub shot_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotClip {
    pub shot_id: String,
    pub video_url: String,
    pub model_used: ModelId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryboardVideoData {
    #[serde(default)]
    pub status: StoryboardPhase,
    #[serde(default)]
    pub model: Option<ModelId>,
    /// Visual style appended to every shot prompt
    #[serde(default)]
    pub style: Option<String>,
    /// Shots gathered from upstream planners
    #[serde(default)]
    pub candidates: Vec<Shot>,
    /// Chosen shot ids; empty means "all candidates"
    #[serde(default)]
    pub selected_shot_ids: Vec<String>,
    #[serde(default)]
    pub prompts: Vec<ShotPrompt>,
    #[serde(default)]
    pub clips: Vec<ShotClip>,
}

// =============================================================================
// Tagged union
// =============================================================================

/// Node data, one variant per [`NodeType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeData {
    PromptInput(PromptInputData),
    ScriptPlanner(ScriptPlannerData),
    ImageGenerator(ImageGeneratorData),
    VideoGenerator(VideoGeneratorData),
    AudioGenerator(AudioGeneratorData),
    Character(CharacterData),
    StoryboardVideoGenerator(StoryboardVideoData),
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::PromptInput(_) => NodeType::PromptInput,
            Self::ScriptPlanner(_) => NodeType::ScriptPlanner,
            Self::ImageGenerator(_) => NodeType::ImageGenerator,
            Self::VideoGenerator(_) => NodeType::VideoGenerator,
            Self::AudioGenerator(_) => NodeType::AudioGenerator,
            Self::Character(_) => NodeType::Character,
            Self::StoryboardVideoGenerator(_) => NodeType::StoryboardVideoGenerator,
        }
    }

    /// Fresh data for a node type
    pub fn empty(node_type: NodeType) -> Self {
        match node_type {
            NodeType::PromptInput => Self::PromptInput(Default::default()),
            NodeType::ScriptPlanner => Self::ScriptPlanner(Default::default()),
            NodeType::ImageGenerator => Self::ImageGenerator(Default::default()),
            NodeType::VideoGenerator => Self::VideoGenerator(Default::default()),
            NodeType::AudioGenerator => Self::AudioGenerator(Default::default()),
            NodeType::Character => Self::Character(Default::default()),
            NodeType::StoryboardVideoGenerator => Self::StoryboardVideoGenerator(Default::default()),
        }
    }

    /// Text this node hands downstream, if any
    pub fn text_output(&self) -> Option<&str> {
        let text = match self {
            Self::PromptInput(d) => Some(d.text.as_str()),
            Self::ScriptPlanner(d) => d.script.as_deref(),
            _ => None,
        };
        text.filter(|t| !t.trim().is_empty())
    }

    /// Image URLs this node hands downstream
    pub fn image_outputs(&self) -> Vec<String> {
        match self {
            Self::ImageGenerator(d) => d.images.clone(),
            Self::Character(d) => d
                .characters
                .iter()
                .filter_map(|c| c.three_view_sheet.clone().or_else(|| c.expression_sheet.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Shots this node hands downstream
    pub fn shot_outputs(&self) -> &[Shot] {
        match self {
            Self::ScriptPlanner(d) => &d.shots,
            _ => &[],
        }
    }
}

/// Typed access to one variant of [`NodeData`]
pub trait NodeVariant: Sized + Clone + Send + Sync + 'static {
    const NODE_TYPE: NodeType;

    fn from_data(data: &NodeData) -> Option<&Self>;
    fn from_data_mut(data: &mut NodeData) -> Option<&mut Self>;
    fn into_data(self) -> NodeData;
}

macro_rules! node_variant {
    ($ty:ty, $variant:ident) => {
        impl NodeVariant for $ty {
            const NODE_TYPE: NodeType = NodeType::$variant;

            fn from_data(data: &NodeData) -> Option<&Self> {
                match data {
                    NodeData::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_data_mut(data: &mut NodeData) -> Option<&mut Self> {
                match data {
                    NodeData::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_data(self) -> NodeData {
                NodeData::$variant(self)
            }
        }

        impl From<$ty> for NodeData {
            fn from(value: $ty) -> Self {
                NodeData::$variant(value)
            }
        }
    };
}

node_variant!(PromptInputData, PromptInput);
node_variant!(ScriptPlannerData, ScriptPlanner);
node_variant!(ImageGeneratorData, ImageGenerator);
node_variant!(VideoGeneratorData, VideoGenerator);
node_variant!(AudioGeneratorData, AudioGenerator);
node_variant!(CharacterData, Character);
node_variant!(StoryboardVideoData, StoryboardVideoGenerator);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_matches_node_type() {
        for node_type in NodeType::ALL {
            assert_eq!(NodeData::empty(node_type).node_type(), node_type);
        }
    }

    #[test]
    fn test_variant_access_is_tag_checked() {
        let mut data: NodeData = ImageGeneratorData {
            prompt: Some("a cat".into()),
            ..Default::default()
        }
        .into();

        assert!(ImageGeneratorData::from_data(&data).is_some());
        assert!(VideoGeneratorData::from_data(&data).is_none());
        assert!(PromptInputData::from_data_mut(&mut data).is_none());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::json!({
            "type": "STORYBOARD_VIDEO_GENERATOR",
            "status": "prompting",
            "selectedShotIds": ["s1"]
        });
        let data: NodeData = serde_json::from_value(json).unwrap();
        let storyboard = StoryboardVideoData::from_data(&data).unwrap();
        assert_eq!(storyboard.status, StoryboardPhase::Prompting);
        assert_eq!(storyboard.selected_shot_ids, vec!["s1"]);

        // Unknown phases are rejected instead of silently skipped
        let bad = serde_json::json!({"type": "STORYBOARD_VIDEO_GENERATOR", "status": "prompt"});
        assert!(serde_json::from_value::<NodeData>(bad).is_err());
    }

    #[test]
    fn test_phase_progression() {
        let mut phase = StoryboardPhase::Idle;
        let mut seen = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                StoryboardPhase::Idle,
                StoryboardPhase::Selecting,
                StoryboardPhase::Prompting,
                StoryboardPhase::Generating,
                StoryboardPhase::Completed,
            ]
        );
        assert_eq!(StoryboardPhase::Completed.next(), StoryboardPhase::Completed);
    }

    #[test]
    fn test_outputs() {
        let prompt = NodeData::PromptInput(PromptInputData::new("  "));
        assert_eq!(prompt.text_output(), None);

        let mut character = CharacterData::default();
        character.character_mut("Mei").expression_sheet = Some("expr.png".into());
        character.character_mut("Mei").three_view_sheet = Some("three.png".into());
        character.character_mut("Jun");
        assert_eq!(character.characters.len(), 2);
        assert_eq!(NodeData::Character(character).image_outputs(), vec!["three.png"]);
    }
}
