//! Shared dependencies of node services
//!
//! Built once at the application root and handed to
//! [`NodeServiceRegistry::with_builtins`](crate::NodeServiceRegistry::with_builtins).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use model_router::{
    AudioProvider, CancellationToken, FallbackConfig, FallbackExecutor, HealthTracker, ImageProvider,
    ModelCategory, ModelId, ModelRegistry, PollConfig, ProviderContext, RouterError, TextProvider,
    VideoProvider,
};

use crate::cache::ArtifactCache;
use crate::data::GenerationInfo;
use crate::generation_state::GenerationStateStore;
use crate::queue::OwnerTaskQueue;

/// Provider clients and their API keys
#[derive(Clone, Default)]
pub struct Providers {
    pub image: Option<Arc<dyn ImageProvider>>,
    pub video: Option<Arc<dyn VideoProvider>>,
    pub text: Option<Arc<dyn TextProvider>>,
    pub audio: Option<Arc<dyn AudioProvider>>,
    pub api_keys: HashMap<ModelCategory, String>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.image = Some(provider);
        self
    }

    pub fn with_video(mut self, provider: Arc<dyn VideoProvider>) -> Self {
        self.video = Some(provider);
        self
    }

    pub fn with_text(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.text = Some(provider);
        self
    }

    pub fn with_audio(mut self, provider: Arc<dyn AudioProvider>) -> Self {
        self.audio = Some(provider);
        self
    }

    pub fn with_api_key(mut self, category: ModelCategory, key: impl Into<String>) -> Self {
        self.api_keys.insert(category, key.into());
        self
    }

    pub fn image(&self) -> model_router::Result<&Arc<dyn ImageProvider>> {
        self.image
            .as_ref()
            .ok_or_else(|| RouterError::ProviderMissing("image".to_string()))
    }

    pub fn video(&self) -> model_router::Result<&Arc<dyn VideoProvider>> {
        self.video
            .as_ref()
            .ok_or_else(|| RouterError::ProviderMissing("video".to_string()))
    }

    pub fn text(&self) -> model_router::Result<&Arc<dyn TextProvider>> {
        self.text
            .as_ref()
            .ok_or_else(|| RouterError::ProviderMissing("text".to_string()))
    }

    pub fn audio(&self) -> model_router::Result<&Arc<dyn AudioProvider>> {
        self.audio
            .as_ref()
            .ok_or_else(|| RouterError::ProviderMissing("audio".to_string()))
    }

    /// API key for a category, empty when none is configured
    pub fn api_key(&self, category: ModelCategory) -> &str {
        self.api_keys.get(&category).map(String::as_str).unwrap_or("")
    }
}

/// Everything a node service needs besides the graph
pub struct ServiceDeps {
    pub fallback: Arc<FallbackExecutor>,
    pub cache: Arc<ArtifactCache>,
    pub providers: Providers,
    pub workspace_id: String,
    pub fallback_config: FallbackConfig,
    pub poll_config: PollConfig,
    /// Cancels in-flight polling loops
    pub cancel: CancellationToken,
    pub queue: Arc<OwnerTaskQueue>,
    pub generation_state: Arc<GenerationStateStore>,
}

impl ServiceDeps {
    pub fn new(
        fallback: Arc<FallbackExecutor>,
        cache: Arc<ArtifactCache>,
        providers: Providers,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            fallback,
            cache,
            providers,
            workspace_id: workspace_id.into(),
            fallback_config: FallbackConfig::default(),
            poll_config: PollConfig::default(),
            cancel: CancellationToken::new(),
            queue: Arc::new(OwnerTaskQueue::new()),
            generation_state: Arc::new(GenerationStateStore::new()),
        }
    }

    /// Built-in catalog, fresh health stats and an in-memory cache
    pub fn in_memory(providers: Providers, workspace_id: impl Into<String>) -> Self {
        let fallback = FallbackExecutor::new(
            Arc::new(ModelRegistry::with_builtin_catalog()),
            Arc::new(HealthTracker::new()),
        );
        Self::new(
            Arc::new(fallback),
            Arc::new(ArtifactCache::in_memory()),
            providers,
            workspace_id,
        )
    }

    pub fn with_fallback_config(mut self, config: FallbackConfig) -> Self {
        self.fallback_config = config;
        self
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.fallback.registry()
    }

    pub fn provider_context(&self, node_id: &str) -> ProviderContext {
        ProviderContext::new(self.workspace_id.clone(), node_id)
    }

    /// The model a node asked for, or the category default
    pub fn resolve_model(&self, category: ModelCategory, requested: Option<&str>) -> model_router::Result<ModelId> {
        match requested.filter(|m| !m.trim().is_empty()) {
            Some(model) => Ok(model.to_string()),
            None => self
                .registry()
                .get_default_model(category)
                .ok_or_else(|| RouterError::UnknownModel(format!("no default {} model", category))),
        }
    }

    /// Run `call` with fallback starting from the resolved model.
    ///
    /// Returns the data together with its provenance.
    pub async fn generate_with_fallback<T, F, Fut>(
        &self,
        category: ModelCategory,
        requested: Option<&str>,
        call: F,
    ) -> model_router::Result<(T, GenerationInfo)>
    where
        F: FnMut(ModelId) -> Fut,
        Fut: Future<Output = model_router::Result<T>>,
    {
        let initial = self.resolve_model(category, requested)?;
        let outcome = self
            .fallback
            .execute_with_fallback(&initial, &self.fallback_config, call)
            .await;

        let chain = outcome.fallback_chain.clone();
        if outcome.used_fallback() {
            log::info!("{} generation fell back along {:?}", category, chain);
        }
        let (data, model) = outcome.into_result()?;
        Ok((data, GenerationInfo::new(model, chain)))
    }
}
