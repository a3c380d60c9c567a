//! Artifact cache
//!
//! Sits in front of every generation call. Before a provider is invoked
//! for a `(workspace, node)` the cache looks for artifacts persisted by an
//! earlier run and returns them instead. After a fresh generation the
//! artifacts are written to storage and indexed.
//!
//! Storage problems never fail a generation: a broken read is a cache
//! miss, a broken write is logged and the fresh artifacts are still
//! returned.

mod metadata;
mod storage;

pub use metadata::{FileMetadata, MetadataIndex, StoredFile};
pub use storage::{
    Artifact, ArtifactContent, ArtifactStorage, FileRef, FileType, FsArtifactStorage,
    MemoryArtifactStorage, SaveOptions, SavedFile,
};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keyed_lock::KeyedLocks;
use crate::types::NodeType;

/// Cache behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// When false every call goes to the provider and nothing is persisted
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Identifies the node a generation belongs to
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub workspace_id: &'a str,
    pub node_id: &'a str,
    pub node_type: NodeType,
}

/// Freshly generated artifacts plus the parameters that produced them
#[derive(Debug, Clone, Default)]
pub struct GeneratedArtifacts {
    pub artifacts: Vec<Artifact>,
    pub params: serde_json::Value,
}

/// Artifacts served by [`ArtifactCache::get_or_generate`]
#[derive(Debug, Clone)]
pub struct CachedArtifacts {
    pub artifacts: Vec<Artifact>,
    pub from_cache: bool,
    /// Generation parameters recorded with the artifacts
    pub params: serde_json::Value,
}

pub struct ArtifactCache {
    storage: Arc<dyn ArtifactStorage>,
    index: MetadataIndex,
    config: CacheConfig,
    locks: KeyedLocks,
    /// Invalidation count per node id. A generation that started before an
    /// invalidation must not leave an index entry behind.
    epochs: Mutex<HashMap<String, u64>>,
}

impl ArtifactCache {
    pub fn new(storage: Arc<dyn ArtifactStorage>, index: MetadataIndex, config: CacheConfig) -> Self {
        Self {
            storage,
            index,
            config,
            locks: KeyedLocks::new(),
            epochs: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory cache, for tests and ephemeral hosts
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryArtifactStorage::new()),
            MetadataIndex::new(),
            CacheConfig::default(),
        )
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ArtifactStorage> {
        &self.storage
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    /// Previously persisted artifacts for a node.
    ///
    /// Reads only the local index and storage. Any failure is reported as a
    /// miss.
    pub async fn lookup(&self, workspace_id: &str, node_id: &str) -> Option<CachedArtifacts> {
        if !self.config.enabled {
            return None;
        }
        let meta = self.index.get(workspace_id, node_id)?;

        let mut artifacts = Vec::with_capacity(meta.files.len());
        for path in meta.relative_paths() {
            match self.storage.read_file(path).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    log::warn!("Cache read failed for node '{}' ({}), treating as miss: {}", node_id, path, e);
                    return None;
                }
            }
        }

        if artifacts.is_empty() {
            return None;
        }
        log::debug!("Cache hit for node '{}' ({} artifacts)", node_id, artifacts.len());
        Some(CachedArtifacts {
            artifacts,
            from_cache: true,
            params: meta.generation_params,
        })
    }

    /// Write artifacts to storage and index them under the node
    pub async fn persist(
        &self,
        key: CacheKey<'_>,
        artifacts: &[Artifact],
        generation_params: serde_json::Value,
    ) -> Result<FileMetadata> {
        let mut saved = Vec::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.iter().enumerate() {
            let file = self
                .storage
                .save_file(key.workspace_id, key.node_id, key.node_type, artifact, &SaveOptions { index })
                .await?;
            saved.push((file, artifact.file_type));
        }

        let meta = FileMetadata::new(key.workspace_id, key.node_id, key.node_type, saved, generation_params);
        self.index.upsert(meta).await
    }

    fn epoch(&self, node_id: &str) -> u64 {
        self.epochs.lock().get(node_id).copied().unwrap_or(0)
    }

    /// Soft delete: drop the index entries for a node in every workspace.
    /// Stored bytes stay until [`purge`](Self::purge) is called.
    ///
    /// Generations already in flight for the node finish, but their
    /// results are not indexed.
    pub async fn invalidate(&self, node_id: &str) -> Result<bool> {
        *self.epochs.lock().entry(node_id.to_string()).or_insert(0) += 1;
        let removed = self.index.remove_node(node_id).await?;
        if !removed.is_empty() {
            log::debug!("Invalidated {} cache entries for node '{}'", removed.len(), node_id);
        }
        Ok(!removed.is_empty())
    }

    /// Delete a node's stored files and its index entry. Irreversible.
    ///
    /// Returns the number of files deleted.
    pub async fn purge(&self, workspace_id: &str, node_id: &str) -> Result<usize> {
        let _guard = self.locks.lock(&lock_key(workspace_id, node_id)).await;

        let files = self.storage.get_files_by_node(workspace_id, node_id).await?;
        for file in &files {
            self.storage.delete_file(&file.relative_path).await?;
        }
        self.index.remove(workspace_id, node_id).await?;
        log::info!("Purged {} files for node '{}'", files.len(), node_id);
        Ok(files.len())
    }

    /// Serve a node's artifacts from cache, or generate and persist them.
    ///
    /// Calls for the same node are serialized, so two concurrent callers
    /// trigger one generation between them.
    pub async fn get_or_generate<F, Fut>(&self, key: CacheKey<'_>, generate: F) -> Result<CachedArtifacts>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeneratedArtifacts>>,
    {
        if !self.config.enabled {
            let generated = generate().await?;
            return Ok(CachedArtifacts {
                artifacts: generated.artifacts,
                from_cache: false,
                params: generated.params,
            });
        }

        let _guard = self.locks.lock(&lock_key(key.workspace_id, key.node_id)).await;

        if let Some(hit) = self.lookup(key.workspace_id, key.node_id).await {
            return Ok(hit);
        }
        log::debug!("Cache miss for node '{}'", key.node_id);

        let epoch = self.epoch(key.node_id);
        let generated = generate().await?;
        if self.epoch(key.node_id) != epoch {
            log::debug!("Node '{}' was invalidated during generation, not caching", key.node_id);
        } else if let Err(e) = self.persist(key, &generated.artifacts, generated.params.clone()).await {
            log::error!("Failed to persist artifacts for node '{}': {}", key.node_id, e);
        } else if self.epoch(key.node_id) != epoch {
            // Invalidated while the entry was being written
            if let Err(e) = self.index.remove(key.workspace_id, key.node_id).await {
                log::error!("Failed to drop stale cache entry for node '{}': {}", key.node_id, e);
            }
        }

        Ok(CachedArtifacts {
            artifacts: generated.artifacts,
            from_cache: false,
            params: generated.params,
        })
    }
}

fn lock_key(workspace_id: &str, node_id: &str) -> String {
    format!("{}\u{1f}{}", workspace_id, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeEngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn key(node_id: &str) -> CacheKey<'_> {
        CacheKey {
            workspace_id: "ws",
            node_id,
            node_type: NodeType::ImageGenerator,
        }
    }

    fn memory_cache() -> (ArtifactCache, Arc<MemoryArtifactStorage>) {
        let storage = Arc::new(MemoryArtifactStorage::new());
        let cache = ArtifactCache::new(storage.clone(), MetadataIndex::new(), CacheConfig::default());
        (cache, storage)
    }

    async fn generate_once(cache: &ArtifactCache, calls: &AtomicUsize) -> Result<CachedArtifacts> {
        cache
            .get_or_generate(key("img-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(GeneratedArtifacts {
                    artifacts: vec![
                        Artifact::url(FileType::Image, "https://cdn/1.png"),
                        Artifact::url(FileType::Image, "https://cdn/2.png"),
                    ],
                    params: serde_json::json!({"model": "gemini-2.5-flash-image"}),
                })
            })
            .await
    }

    #[tokio::test]
    async fn test_second_generation_is_served_from_cache() {
        let (cache, _) = memory_cache();
        let calls = AtomicUsize::new(0);

        let first = generate_once(&cache, &calls).await.unwrap();
        let second = generate_once(&cache, &calls).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.artifacts, second.artifacts);
        assert_eq!(second.params["model"], "gemini-2.5-flash-image");
    }

    #[tokio::test]
    async fn test_concurrent_callers_generate_once() {
        let (cache, _) = memory_cache();
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(generate_once(&cache, &calls), generate_once(&cache, &calls));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(a.unwrap().from_cache != b.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_miss() {
        let (cache, storage) = memory_cache();
        let calls = AtomicUsize::new(0);
        generate_once(&cache, &calls).await.unwrap();

        storage.set_fail_reads(true);
        assert!(cache.lookup("ws", "img-1").await.is_none());
        let again = generate_once(&cache, &calls).await.unwrap();
        assert!(!again.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_still_returns_artifacts() {
        let (cache, storage) = memory_cache();
        storage.set_fail_writes(true);
        let calls = AtomicUsize::new(0);

        let result = generate_once(&cache, &calls).await.unwrap();
        assert_eq!(result.artifacts.len(), 2);
        assert!(cache.index().is_empty());
    }

    #[tokio::test]
    async fn test_generation_errors_propagate_and_are_not_cached() {
        let (cache, _) = memory_cache();
        let err = cache
            .get_or_generate(key("img-1"), || async { Err(NodeEngineError::failed("quota exceeded")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota"));
        assert!(cache.lookup("ws", "img-1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_is_soft_and_purge_deletes() {
        let (cache, storage) = memory_cache();
        let calls = AtomicUsize::new(0);
        generate_once(&cache, &calls).await.unwrap();

        assert!(cache.invalidate("img-1").await.unwrap());
        assert!(cache.lookup("ws", "img-1").await.is_none());
        assert_eq!(storage.file_count(), 2);

        assert_eq!(cache.purge("ws", "img-1").await.unwrap(), 2);
        assert_eq!(storage.file_count(), 0);
        assert!(!cache.invalidate("img-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_generates() {
        let cache = ArtifactCache::new(
            Arc::new(MemoryArtifactStorage::new()),
            MetadataIndex::new(),
            CacheConfig { enabled: false },
        );
        let calls = AtomicUsize::new(0);
        generate_once(&cache, &calls).await.unwrap();
        generate_once(&cache, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_generation_is_not_cached() {
        let (cache, _) = memory_cache();
        let started = Notify::new();
        let release = Notify::new();

        let generation = cache.get_or_generate(key("img-1"), || async {
            started.notify_one();
            release.notified().await;
            Ok(GeneratedArtifacts {
                artifacts: vec![Artifact::url(FileType::Image, "https://cdn/late.png")],
                params: serde_json::Value::Null,
            })
        });
        let delete = async {
            started.notified().await;
            assert!(!cache.invalidate("img-1").await.unwrap());
            release.notify_one();
        };
        let (result, ()) = tokio::join!(generation, delete);

        // The caller still gets its artifacts, but nothing is left indexed
        let result = result.unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.artifacts.len(), 1);
        assert!(cache.lookup("ws", "img-1").await.is_none());
        assert!(cache.index().is_empty());

        // Generations started after the invalidation are cached again
        let calls = AtomicUsize::new(0);
        generate_once(&cache, &calls).await.unwrap();
        assert!(cache.lookup("ws", "img-1").await.is_some());
    }

    async fn fs_cache(root: &std::path::Path) -> ArtifactCache {
        let index = MetadataIndex::with_persistence(root.join("index"));
        index.load_from_disk().await.unwrap();
        ArtifactCache::new(
            Arc::new(FsArtifactStorage::new(root.join("files"))),
            index,
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_fs_backed_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let calls = AtomicUsize::new(0);
        generate_once(&fs_cache(dir.path()).await, &calls).await.unwrap();
        let restarted = generate_once(&fs_cache(dir.path()).await, &calls).await.unwrap();

        assert!(restarted.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_similar_node_ids_keep_separate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = fs_cache(dir.path()).await;

        for (node, url) in [("shot.1", "https://cdn/A.png"), ("shot_1", "https://cdn/B.png")] {
            cache
                .persist(key(node), &[Artifact::url(FileType::Image, url)], serde_json::Value::Null)
                .await
                .unwrap();
        }
        let hit = cache.lookup("ws", "shot.1").await.unwrap();
        assert_eq!(hit.artifacts[0].as_url(), Some("https://cdn/A.png"));

        assert_eq!(cache.purge("ws", "shot_1").await.unwrap(), 1);
        let hit = cache.lookup("ws", "shot.1").await.unwrap();
        assert_eq!(hit.artifacts[0].as_url(), Some("https://cdn/A.png"));
    }
}
