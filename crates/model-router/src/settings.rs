//! Persisted model settings: user priority lists and usage stats
//!
//! The embedding application owns where these live. This module defines the
//! JSON shape, a [`SettingsStore`] hook, and a file-backed store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::catalog::{ModelCategory, ModelId};
use crate::error::Result;
use crate::health::{HealthTracker, ModelUsageStats};
use crate::registry::ModelRegistry;

/// File name used by [`JsonFileSettingsStore`]
pub const SETTINGS_FILE: &str = "model-settings.json";

/// Everything about models that survives a restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    #[serde(default)]
    pub user_priorities: HashMap<ModelCategory, Vec<ModelId>>,
    #[serde(default)]
    pub usage_stats: HashMap<ModelId, ModelUsageStats>,
}

impl ModelSettings {
    /// Capture the current registry overrides and health stats
    pub fn capture(registry: &ModelRegistry, health: &HealthTracker) -> Self {
        Self {
            user_priorities: registry.user_priorities(),
            usage_stats: health.snapshot(),
        }
    }

    /// Push these settings into a registry and tracker
    pub fn apply(&self, registry: &ModelRegistry, health: &HealthTracker) {
        for (category, ids) in &self.user_priorities {
            registry.set_user_priority(*category, ids.clone());
        }
        health.restore(self.usage_stats.clone());
    }
}

/// Read/write hook for persisted settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<ModelSettings>;
    async fn save(&self, settings: &ModelSettings) -> Result<()>;
}

/// Stores settings as pretty-printed JSON in a directory
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    /// Store under `dir/model-settings.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    /// Missing or unparseable files yield default settings
    async fn load(&self) -> Result<ModelSettings> {
        if !self.path.exists() {
            return Ok(ModelSettings::default());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        match serde_json::from_str(&content) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                log::warn!("Ignoring unreadable model settings at {:?}: {}", self.path, e);
                Ok(ModelSettings::default())
            }
        }
    }

    async fn save(&self, settings: &ModelSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, content).await?;
        log::debug!("Saved model settings to {:?}", self.path);
        Ok(())
    }
}

/// In-memory store, for tests and hosts without persistence
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Mutex<ModelSettings>,
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<ModelSettings> {
        Ok(self.settings.lock().clone())
    }

    async fn save(&self, settings: &ModelSettings) -> Result<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelInfo;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(vec![
            ModelInfo::new("a", ModelCategory::Text, 0),
            ModelInfo::new("b", ModelCategory::Text, 1),
        ])
    }

    #[tokio::test]
    async fn test_file_roundtrip_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSettingsStore::new(dir.path());

        let registry = registry();
        let health = HealthTracker::new();
        registry.set_user_priority(ModelCategory::Text, vec!["b".to_string(), "a".to_string()]);
        health.record_result("b", false, Some("quota exceeded"));

        store.save(&ModelSettings::capture(&registry, &health)).await.unwrap();
        assert!(store.path().exists());

        let fresh_registry = self::registry();
        let fresh_health = HealthTracker::new();
        store.load().await.unwrap().apply(&fresh_registry, &fresh_health);

        let ordered: Vec<_> = fresh_registry
            .get_models_by_priority(ModelCategory::Text)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ordered, vec!["b", "a"]);
        assert_eq!(fresh_health.get_stats("b").unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSettingsStore::new(dir.path());
        assert_eq!(store.load().await.unwrap(), ModelSettings::default());

        std::fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load().await.unwrap(), ModelSettings::default());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySettingsStore::default();
        let mut settings = ModelSettings::default();
        settings
            .user_priorities
            .insert(ModelCategory::Video, vec!["veo".to_string()]);
        store.save(&settings).await.unwrap();
        assert_eq!(store.load().await.unwrap(), settings);
    }
}
