//! Retry-across-models execution
//!
//! [`FallbackExecutor`] wraps a provider call and walks the category's
//! priority chain on failure, consulting the [`HealthTracker`] before every
//! attempt so that a model which became unhealthy earlier in the same chain
//! is bypassed.
//!
//! # Attempt accounting
//!
//! Each loop iteration consumes one attempt slot and appends the model to
//! the fallback chain, whether the model was called or skipped. Therefore
//! `fallback_chain.len() == attempts` holds for every outcome except an
//! unknown initial model.
//!
//! # Persistence
//!
//! With a [`SettingsStore`] attached, the registry overrides and health
//! stats are saved after every request that called or skipped a model, so
//! circuit-breaker state survives a restart.

use std::future::Future;
use std::sync::Arc;

use crate::catalog::ModelId;
use crate::config::FallbackConfig;
use crate::error::{Result, RouterError};
use crate::health::HealthTracker;
use crate::registry::{is_quota_error, ModelRegistry};
use crate::settings::{ModelSettings, SettingsStore};

/// Outcome of one logical generation request
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    /// Model that produced `data`
    pub model: Option<ModelId>,
    pub attempts: u32,
    pub error: Option<RouterError>,
    /// Every model tried, skipped ones included, in order
    pub fallback_chain: Vec<ModelId>,
}

impl<T> FallbackOutcome<T> {
    fn succeeded(data: T, model: ModelId, attempts: u32, fallback_chain: Vec<ModelId>) -> Self {
        Self {
            success: true,
            data: Some(data),
            model: Some(model),
            attempts,
            error: None,
            fallback_chain,
        }
    }

    fn failed(error: RouterError, attempts: u32, fallback_chain: Vec<ModelId>) -> Self {
        Self {
            success: false,
            data: None,
            model: None,
            attempts,
            error: Some(error),
            fallback_chain,
        }
    }

    /// Whether a model other than the first one produced the result
    pub fn used_fallback(&self) -> bool {
        match (&self.model, self.fallback_chain.first()) {
            (Some(model), Some(first)) => model != first,
            _ => false,
        }
    }

    /// Collapse into a `Result` of the data and the model that produced it
    pub fn into_result(self) -> Result<(T, ModelId)> {
        match (self.data, self.model) {
            (Some(data), Some(model)) => Ok((data, model)),
            _ => Err(self.error.unwrap_or(RouterError::ExhaustedFallback {
                chain: self.fallback_chain,
            })),
        }
    }
}

/// Executes provider calls with per-model degradation
pub struct FallbackExecutor {
    registry: Arc<ModelRegistry>,
    health: Arc<HealthTracker>,
    settings: Option<Arc<dyn SettingsStore>>,
    /// Orders saves so an older snapshot never overwrites a newer one
    save_lock: tokio::sync::Mutex<()>,
}

impl FallbackExecutor {
    pub fn new(registry: Arc<ModelRegistry>, health: Arc<HealthTracker>) -> Self {
        Self {
            registry,
            health,
            settings: None,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Persist settings to `store` after every request
    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Apply previously saved settings to the registry and tracker.
    ///
    /// Returns false when no store is attached.
    pub async fn load_settings(&self) -> Result<bool> {
        let Some(store) = &self.settings else {
            return Ok(false);
        };
        let settings = store.load().await?;
        settings.apply(&self.registry, &self.health);
        log::info!(
            "Restored model settings ({} models with usage stats)",
            settings.usage_stats.len()
        );
        Ok(true)
    }

    /// Save the current registry overrides and health stats.
    ///
    /// A no-op when no store is attached.
    pub async fn save_settings(&self) -> Result<()> {
        let Some(store) = &self.settings else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        store
            .save(&ModelSettings::capture(&self.registry, &self.health))
            .await
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Run `call` starting at `initial_model`, falling back along the
    /// priority chain on failure.
    ///
    /// Timeouts and cancellations end the chain immediately. A cancelled
    /// attempt is not recorded against the model; everything recorded
    /// before it stays recorded. With `enable_fallback == false` the model
    /// is pinned: the circuit breaker is not consulted and the first
    /// failure is final.
    ///
    /// A failed settings save is logged and does not change the outcome.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        initial_model: &str,
        config: &FallbackConfig,
        call: F,
    ) -> FallbackOutcome<T>
    where
        F: FnMut(ModelId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = self.run_chain(initial_model, config, call).await;
        if outcome.attempts > 0 {
            if let Err(e) = self.save_settings().await {
                log::warn!("Failed to save model settings: {}", e);
            }
        }
        outcome
    }

    async fn run_chain<T, F, Fut>(
        &self,
        initial_model: &str,
        config: &FallbackConfig,
        mut call: F,
    ) -> FallbackOutcome<T>
    where
        F: FnMut(ModelId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.registry.get_model(initial_model).is_none() {
            return FallbackOutcome::failed(
                RouterError::UnknownModel(initial_model.to_string()),
                0,
                Vec::new(),
            );
        }

        let max_attempts = config.max_attempts.max(1);
        let mut current: ModelId = initial_model.to_string();
        let mut excluded: Vec<ModelId> = Vec::new();
        let mut chain: Vec<ModelId> = Vec::new();
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            chain.push(current.clone());

            if config.enable_fallback && self.health.should_skip(&current) {
                log::info!(
                    "Skipping unhealthy model '{}' (attempt {}/{})",
                    current,
                    attempts,
                    max_attempts
                );
                excluded.push(current.clone());
                match self.registry.get_next_fallback_model(&current, &excluded) {
                    Some(next) => {
                        current = next;
                        continue;
                    }
                    None => {
                        return FallbackOutcome::failed(
                            RouterError::ExhaustedFallback { chain: chain.clone() },
                            attempts,
                            chain,
                        );
                    }
                }
            }

            log::debug!("Calling model '{}' (attempt {}/{})", current, attempts, max_attempts);
            let error = match call(current.clone()).await {
                Ok(data) => {
                    self.health.record_result(&current, true, None);
                    if attempts > 1 {
                        log::info!("Model '{}' succeeded after fallback: {:?}", current, chain);
                    }
                    return FallbackOutcome::succeeded(data, current, attempts, chain);
                }
                Err(RouterError::Cancelled) => {
                    log::info!("Generation on '{}' cancelled", current);
                    return FallbackOutcome::failed(RouterError::Cancelled, attempts, chain);
                }
                Err(err) => err,
            };

            let message = error.to_string();
            self.health.record_result(&current, false, Some(&message));
            let error = classify(error, &current);
            log::warn!("Model '{}' failed: {}", current, error);

            if error.is_terminal() || !config.enable_fallback || attempts >= max_attempts {
                return FallbackOutcome::failed(error, attempts, chain);
            }

            excluded.push(current.clone());
            match self.registry.get_next_fallback_model(&current, &excluded) {
                Some(next) => {
                    log::info!("Falling back from '{}' to '{}'", current, next);
                    current = next;
                }
                None => {
                    log::warn!("Fallback chain exhausted: {:?}", chain);
                    return FallbackOutcome::failed(
                        RouterError::ExhaustedFallback { chain: chain.clone() },
                        attempts,
                        chain,
                    );
                }
            }
        }

        // Only reachable when the last slot was spent on a skipped model
        FallbackOutcome::failed(
            RouterError::ExhaustedFallback { chain: chain.clone() },
            attempts,
            chain,
        )
    }
}

/// Promote provider errors whose text looks quota related
fn classify(error: RouterError, model: &str) -> RouterError {
    match error {
        RouterError::Provider(message) if is_quota_error(&message) => RouterError::Quota {
            model: model.to_string(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelCategory, ModelInfo};
    use crate::settings::MemorySettingsStore;
    use parking_lot::Mutex;

    fn executor() -> FallbackExecutor {
        let registry = ModelRegistry::new(vec![
            ModelInfo::new("sora", ModelCategory::Video, 0),
            ModelInfo::new("veo", ModelCategory::Video, 1),
            ModelInfo::new("wan", ModelCategory::Video, 2),
            ModelInfo::new("kling", ModelCategory::Video, 3),
        ]);
        FallbackExecutor::new(Arc::new(registry), Arc::new(HealthTracker::new()))
    }

    #[tokio::test]
    async fn test_always_failing_call_uses_every_attempt() {
        let executor = executor();
        let calls = Mutex::new(Vec::new());

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |model| {
                calls.lock().push(model);
                async { Err(RouterError::provider("internal server error")) }
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.fallback_chain, vec!["sora", "veo", "wan"]);
        assert_eq!(outcome.fallback_chain.len() as u32, outcome.attempts);
        assert_eq!(*calls.lock(), vec!["sora", "veo", "wan"]);
        assert!(matches!(outcome.error, Some(RouterError::Provider(_))));
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let executor = executor();
        let calls = Mutex::new(0u32);

        let outcome = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |model| {
                *calls.lock() += 1;
                async move {
                    if model == "veo" {
                        Ok(format!("video from {}", model))
                    } else {
                        Err(RouterError::provider("bad gateway"))
                    }
                }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(*calls.lock(), 2);
        assert_eq!(outcome.model.as_deref(), Some("veo"));
        assert!(outcome.used_fallback());
        assert_eq!(outcome.into_result().unwrap().0, "video from veo");
    }

    #[tokio::test]
    async fn test_chain_exhausts_before_max_attempts() {
        let executor = executor();
        let config = FallbackConfig {
            max_attempts: 10,
            enable_fallback: true,
        };

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("wan", &config, |_| async {
                Err(RouterError::provider("boom"))
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.fallback_chain, vec!["wan", "kling"]);
        assert!(matches!(
            outcome.error,
            Some(RouterError::ExhaustedFallback { ref chain }) if chain.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_quota_error_is_distinguished() {
        let executor = executor();
        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("sora", &FallbackConfig::no_fallback(), |_| async {
                Err(RouterError::provider("429: rate limit exceeded"))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        match outcome.error {
            Some(RouterError::Quota { model, .. }) => assert_eq!(model, "sora"),
            other => panic!("expected quota error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unhealthy_model_is_skipped_without_calling() {
        let executor = executor();
        for _ in 0..3 {
            executor.health().record_result("sora", false, Some("boom"));
        }
        let calls = Mutex::new(Vec::new());

        let outcome = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |model| {
                calls.lock().push(model.clone());
                async move { Ok(model) }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.fallback_chain, vec!["sora", "veo"]);
        assert_eq!(*calls.lock(), vec!["veo"]);
        // Skips do not add failure records
        assert_eq!(executor.health().get_stats("sora").unwrap().failure_count, 3);
    }

    #[tokio::test]
    async fn test_model_unhealthy_mid_chain_is_bypassed() {
        let registry = ModelRegistry::new(vec![
            ModelInfo::new("a", ModelCategory::Image, 0),
            ModelInfo::new("b", ModelCategory::Image, 1),
            ModelInfo::new("c", ModelCategory::Image, 2),
        ]);
        let executor = FallbackExecutor::new(Arc::new(registry), Arc::new(HealthTracker::new()));
        // "b" is one failure away from the threshold
        executor.health().record_result("b", false, Some("x"));
        executor.health().record_result("b", false, Some("x"));

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("b", &FallbackConfig { max_attempts: 3, enable_fallback: true }, |_| async {
                Err(RouterError::provider("boom"))
            })
            .await;
        assert!(executor.health().should_skip("b"));
        assert_eq!(outcome.fallback_chain, vec!["b", "c"]);

        // A new request starting at "b" now skips it before calling
        let calls = Mutex::new(Vec::new());
        let outcome = executor
            .execute_with_fallback("b", &FallbackConfig::default(), |model| {
                calls.lock().push(model.clone());
                async move { Ok(model) }
            })
            .await;
        assert_eq!(outcome.model.as_deref(), Some("c"));
        assert_eq!(*calls.lock(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_timeout_and_cancel_end_chain() {
        let executor = executor();

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |_| async {
                Err(RouterError::Timeout { attempts: 120 })
            })
            .await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.error, Some(RouterError::Timeout { .. })));
        assert_eq!(executor.health().get_stats("sora").unwrap().failure_count, 1);

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("veo", &FallbackConfig::default(), |_| async {
                Err(RouterError::Cancelled)
            })
            .await;
        assert!(matches!(outcome.error, Some(RouterError::Cancelled)));
        assert!(executor.health().get_stats("veo").is_none());
    }

    #[tokio::test]
    async fn test_unknown_initial_model() {
        let executor = executor();
        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("missing", &FallbackConfig::default(), |_| async { Ok(()) })
            .await;
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(outcome.error, Some(RouterError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_recorded_failures_reach_the_settings_store() {
        let store = Arc::new(MemorySettingsStore::default());
        let registry = Arc::new(ModelRegistry::new(vec![
            ModelInfo::new("sora", ModelCategory::Video, 0),
            ModelInfo::new("veo", ModelCategory::Video, 1),
        ]));
        let executor = FallbackExecutor::new(registry.clone(), Arc::new(HealthTracker::new()))
            .with_settings_store(store.clone());

        let outcome = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |model| async move {
                if model == "sora" {
                    Err(RouterError::provider("quota exceeded"))
                } else {
                    Ok(model)
                }
            })
            .await;
        assert!(outcome.success);

        // Nothing was saved by hand; the executor did it
        let saved = store.load().await.unwrap();
        assert_eq!(saved.usage_stats["sora"].failure_count, 1);
        assert_eq!(saved.usage_stats["veo"].success_count, 1);

        // A restarted process sees the same health
        let restarted = FallbackExecutor::new(registry, Arc::new(HealthTracker::new()))
            .with_settings_store(store.clone());
        assert!(restarted.load_settings().await.unwrap());
        let stats = restarted.health().get_stats("sora").unwrap();
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.last_error.as_deref(), Some("Provider error: quota exceeded"));
    }

    #[tokio::test]
    async fn test_unknown_model_does_not_save() {
        let store = Arc::new(MemorySettingsStore::default());
        let executor = executor().with_settings_store(store.clone());
        executor.health().record_result("sora", false, Some("boom"));

        let _: FallbackOutcome<()> = executor
            .execute_with_fallback("missing", &FallbackConfig::default(), |_| async { Ok(()) })
            .await;
        assert!(store.load().await.unwrap().usage_stats.is_empty());
        assert!(!FallbackExecutor::new(
            Arc::new(ModelRegistry::new(Vec::new())),
            Arc::new(HealthTracker::new())
        )
        .load_settings()
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn test_video_fallback_scenario() {
        let registry = ModelRegistry::new(vec![
            ModelInfo::new("sora", ModelCategory::Video, 0),
            ModelInfo::new("veo", ModelCategory::Video, 1),
            ModelInfo::new("wan", ModelCategory::Video, 2),
        ]);
        let registry = Arc::new(registry);
        let executor = FallbackExecutor::new(registry.clone(), Arc::new(HealthTracker::new()));

        let outcome: FallbackOutcome<()> = executor
            .execute_with_fallback("sora", &FallbackConfig::default(), |_| async {
                Err(RouterError::provider("upstream unavailable"))
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.fallback_chain, vec!["sora", "veo", "wan"]);
        let excluded = outcome.fallback_chain.clone();
        assert_eq!(registry.get_next_fallback_model("wan", &excluded), None);
    }
}
