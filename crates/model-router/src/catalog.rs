//! Static model catalog
//!
//! The catalog is immutable data loaded once at startup. User reordering is
//! stored separately as an id list (see [`crate::registry::ModelRegistry`]).

use serde::{Deserialize, Serialize};

/// Identifier of a generation model (e.g. "sora-2")
pub type ModelId = String;

/// Kind of content a model produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    Image,
    Video,
    Text,
    Audio,
}

impl ModelCategory {
    /// All categories, in display order
    pub const ALL: [ModelCategory; 4] = [
        ModelCategory::Image,
        ModelCategory::Video,
        ModelCategory::Text,
        ModelCategory::Audio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static descriptor for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: ModelId,
    /// Human-readable name
    pub name: String,
    pub category: ModelCategory,
    /// Lower is preferred
    pub priority: u32,
    /// Output quality score (1-10)
    pub quality: u8,
    /// Speed score (1-10)
    pub speed: u8,
    /// Cost score (1-10, higher is more expensive)
    pub cost: u8,
    /// Capability tags such as "text-to-video" or "reference-image"
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl ModelInfo {
    /// Create a descriptor with neutral scores
    pub fn new(id: impl Into<String>, category: ModelCategory, priority: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            priority,
            quality: 5,
            speed: 5,
            cost: 5,
            capabilities: Vec::new(),
            is_default: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set quality, speed and cost scores
    pub fn with_scores(mut self, quality: u8, speed: u8, cost: u8) -> Self {
        self.quality = quality.clamp(1, 10);
        self.speed = speed.clamp(1, 10);
        self.cost = cost.clamp(1, 10);
        self
    }

    pub fn with_capabilities(mut self, tags: &[&str]) -> Self {
        self.capabilities = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Mark this model as the category default
    pub fn default_model(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

/// The built-in catalog shipped with the application
pub fn builtin_catalog() -> Vec<ModelInfo> {
    vec![
        // Image
        ModelInfo::new("gemini-2.5-flash-image", ModelCategory::Image, 0)
            .with_name("Gemini 2.5 Flash Image")
            .with_scores(8, 8, 4)
            .with_capabilities(&["text-to-image", "reference-image"])
            .default_model(),
        ModelInfo::new("gemini-3-pro-image-preview", ModelCategory::Image, 1)
            .with_name("Gemini 3 Pro Image")
            .with_scores(9, 6, 7)
            .with_capabilities(&["text-to-image", "reference-image"]),
        ModelInfo::new("imagen-4.0-generate-001", ModelCategory::Image, 2)
            .with_name("Imagen 4")
            .with_scores(8, 7, 6)
            .with_capabilities(&["text-to-image"]),
        // Video
        ModelInfo::new("sora-2", ModelCategory::Video, 0)
            .with_name("Sora 2")
            .with_scores(9, 4, 8)
            .with_capabilities(&["text-to-video", "image-to-video"])
            .default_model(),
        ModelInfo::new("veo-3.1-fast-generate-preview", ModelCategory::Video, 1)
            .with_name("Veo 3.1 Fast")
            .with_scores(8, 7, 7)
            .with_capabilities(&["text-to-video", "image-to-video"]),
        ModelInfo::new("wan2.5-i2v-preview", ModelCategory::Video, 2)
            .with_name("Wan 2.5")
            .with_scores(7, 6, 3)
            .with_capabilities(&["image-to-video"]),
        // Text
        ModelInfo::new("gemini-2.5-flash", ModelCategory::Text, 0)
            .with_name("Gemini 2.5 Flash")
            .with_scores(8, 9, 2)
            .with_capabilities(&["chat", "json"])
            .default_model(),
        ModelInfo::new("gemini-2.5-pro", ModelCategory::Text, 1)
            .with_name("Gemini 2.5 Pro")
            .with_scores(10, 5, 6)
            .with_capabilities(&["chat", "json"]),
        ModelInfo::new("gemini-2.5-flash-lite", ModelCategory::Text, 2)
            .with_name("Gemini 2.5 Flash Lite")
            .with_scores(6, 10, 1)
            .with_capabilities(&["chat"]),
        // Audio
        ModelInfo::new("gemini-2.5-flash-preview-tts", ModelCategory::Audio, 0)
            .with_name("Gemini TTS")
            .with_scores(7, 8, 3)
            .with_capabilities(&["text-to-speech"])
            .default_model(),
        ModelInfo::new("suno-v4", ModelCategory::Audio, 1)
            .with_name("Suno v4")
            .with_scores(8, 5, 6)
            .with_capabilities(&["music"]),
    ]
}
