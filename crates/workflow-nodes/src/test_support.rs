//! Mock providers and fixtures for service tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use model_router::{
    AudioProvider, AudioRequest, ImageOptions, ImageProvider, PollConfig, ProviderContext, Result,
    RouterError, SubmittedTask, TaskStatus, TextProvider, TextRequest, VideoProvider, VideoRequest,
};
use node_engine::{ExecutionContext, Node, Providers, RecordingUpdateSink, ServiceDeps};
use parking_lot::Mutex;

/// Image provider returning `https://img/{model}/{n}.png`, failing for
/// the configured models
#[derive(Default)]
pub struct MockImageProvider {
    failures: HashMap<String, String>,
    pub calls: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl MockImageProvider {
    pub fn failing(mut self, model: &str, error: &str) -> Self {
        self.failures.insert(model.to_string(), error.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn generate_images(
        &self,
        prompt: &str,
        model: &str,
        reference_images: &[String],
        options: &ImageOptions,
    ) -> Result<Vec<String>> {
        self.calls
            .lock()
            .push((model.to_string(), prompt.to_string(), reference_images.to_vec()));
        if let Some(error) = self.failures.get(model) {
            return Err(RouterError::provider(error.clone()));
        }
        Ok((0..options.count)
            .map(|i| format!("https://img/{}/{}.png", model, i))
            .collect())
    }
}

/// Text provider answering with a fixed response per model, or echoing
#[derive(Default)]
pub struct MockTextProvider {
    responses: HashMap<String, String>,
    failures: HashMap<String, String>,
    pub calls: Mutex<Vec<(String, TextRequest)>>,
}

impl MockTextProvider {
    pub fn responding(mut self, model: &str, response: &str) -> Self {
        self.responses.insert(model.to_string(), response.to_string());
        self
    }

    pub fn failing(mut self, model: &str, error: &str) -> Self {
        self.failures.insert(model.to_string(), error.to_string());
        self
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    async fn generate_text(&self, model: &str, request: &TextRequest) -> Result<String> {
        self.calls.lock().push((model.to_string(), request.clone()));
        if let Some(error) = self.failures.get(model) {
            return Err(RouterError::provider(error.clone()));
        }
        Ok(self
            .responses
            .get(model)
            .cloned()
            .unwrap_or_else(|| format!("[{}] {}", model, request.prompt)))
    }
}

#[derive(Default)]
pub struct MockAudioProvider {
    pub calls: Mutex<Vec<(String, AudioRequest)>>,
}

#[async_trait]
impl AudioProvider for MockAudioProvider {
    async fn generate_audio(&self, model: &str, request: &AudioRequest) -> Result<String> {
        self.calls.lock().push((model.to_string(), request.clone()));
        Ok(format!("https://audio/{}.mp3", model))
    }
}

/// Video provider whose jobs finish after `checks_to_finish` status checks.
/// Jobs on failing models are reported as failed on the first check.
pub struct MockVideoProvider {
    checks_to_finish: u32,
    failures: HashMap<String, String>,
    pub submissions: Mutex<Vec<(String, VideoRequest)>>,
    checks: Mutex<HashMap<String, u32>>,
}

impl MockVideoProvider {
    pub fn new(checks_to_finish: u32) -> Self {
        Self {
            checks_to_finish,
            failures: HashMap::new(),
            submissions: Mutex::new(Vec::new()),
            checks: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing(mut self, model: &str, error: &str) -> Self {
        self.failures.insert(model.to_string(), error.to_string());
        self
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl VideoProvider for MockVideoProvider {
    async fn submit_task(
        &self,
        model: &str,
        request: &VideoRequest,
        _api_key: &str,
        _context: &ProviderContext,
        _sub_model: Option<&str>,
    ) -> Result<SubmittedTask> {
        let mut submissions = self.submissions.lock();
        submissions.push((model.to_string(), request.clone()));
        Ok(SubmittedTask {
            task_id: format!("{}-task-{}", model, submissions.len()),
        })
    }

    async fn check_status(
        &self,
        model: &str,
        task_id: &str,
        _api_key: &str,
        _context: &ProviderContext,
    ) -> Result<TaskStatus> {
        if let Some(error) = self.failures.get(model) {
            return Ok(TaskStatus::failed(error.clone()));
        }
        let mut checks = self.checks.lock();
        let count = checks.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.checks_to_finish {
            Ok(TaskStatus::succeeded(format!("https://video/{}.mp4", task_id)))
        } else {
            Ok(TaskStatus::running(*count as f32 * 25.0))
        }
    }
}

/// Every mock provider wired into shared deps
pub struct Fixture {
    pub image: Arc<MockImageProvider>,
    pub text: Arc<MockTextProvider>,
    pub audio: Arc<MockAudioProvider>,
    pub video: Arc<MockVideoProvider>,
    pub deps: Arc<ServiceDeps>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(
            MockImageProvider::default(),
            MockTextProvider::default(),
            MockVideoProvider::new(2),
        )
    }

    pub fn with(image: MockImageProvider, text: MockTextProvider, video: MockVideoProvider) -> Self {
        let image = Arc::new(image);
        let text = Arc::new(text);
        let audio = Arc::new(MockAudioProvider::default());
        let video = Arc::new(video);
        let providers = Providers::new()
            .with_image(image.clone())
            .with_text(text.clone())
            .with_audio(audio.clone())
            .with_video(video.clone());
        Self {
            image,
            text,
            audio,
            video,
            deps: Arc::new(ServiceDeps::in_memory(providers, "ws-test").with_poll_config(PollConfig {
                interval: Duration::from_millis(1),
                max_attempts: 20,
            })),
        }
    }
}

/// Context over `nodes` with a recording sink
pub fn context(
    nodes: Vec<Node>,
    connections: Vec<node_engine::Connection>,
) -> (ExecutionContext, Arc<RecordingUpdateSink>) {
    let sink = Arc::new(RecordingUpdateSink::new());
    (ExecutionContext::new(nodes, connections, sink.clone()), sink)
}
