//! Provider call interface
//!
//! Concrete HTTP clients (Gemini, Sora, Veo, ...) live outside this crate.
//! They implement these traits and are handed to the node services at
//! startup. Every method reports failures as [`RouterError`] so the
//! fallback executor can classify them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifies who a provider call is made for (logging, billing, storage)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderContext {
    pub workspace_id: String,
    pub node_id: String,
}

impl ProviderContext {
    pub fn new(workspace_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            node_id: node_id.into(),
        }
    }
}

/// Request for a long-running video job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub prompt: String,
    /// Image URLs used as first frame or style reference
    #[serde(default)]
    pub reference_images: Vec<String>,
    pub duration_secs: Option<u32>,
    pub aspect_ratio: Option<String>,
}

/// Handle returned by a job submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTask {
    pub task_id: String,
}

/// Provider-side state of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// One status check result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub status: JobState,
    /// Progress percentage (0-100)
    pub progress: f32,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn running(progress: f32) -> Self {
        Self {
            status: JobState::Running,
            progress,
            video_url: None,
            error: None,
        }
    }

    pub fn succeeded(video_url: impl Into<String>) -> Self {
        Self {
            status: JobState::Succeeded,
            progress: 100.0,
            video_url: Some(video_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobState::Failed,
            progress: 0.0,
            video_url: None,
            error: Some(error.into()),
        }
    }
}

/// Submit-then-poll video generation
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn submit_task(
        &self,
        model: &str,
        request: &VideoRequest,
        api_key: &str,
        context: &ProviderContext,
        sub_model: Option<&str>,
    ) -> Result<SubmittedTask>;

    async fn check_status(
        &self,
        model: &str,
        task_id: &str,
        api_key: &str,
        context: &ProviderContext,
    ) -> Result<TaskStatus>;
}

/// Options for image generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    pub aspect_ratio: Option<String>,
    /// Number of images requested
    pub count: u32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: None,
            count: 1,
        }
    }
}

/// Synchronous-style image generation returning image URLs
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_images(
        &self,
        prompt: &str,
        model: &str,
        reference_images: &[String],
        options: &ImageOptions,
    ) -> Result<Vec<String>>;
}

/// Request for a text model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    /// Ask the model for a JSON document
    #[serde(default)]
    pub json_output: bool,
}

/// Text/LLM generation
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn generate_text(&self, model: &str, request: &TextRequest) -> Result<String>;
}

/// Request for speech or music
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRequest {
    pub text: String,
    pub voice: Option<String>,
}

/// Audio generation returning an audio URL
#[async_trait]
pub trait AudioProvider: Send + Sync {
    async fn generate_audio(&self, model: &str, request: &AudioRequest) -> Result<String>;
}
