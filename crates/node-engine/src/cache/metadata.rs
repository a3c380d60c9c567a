//! Artifact metadata index
//!
//! One [`FileMetadata`] record per `(workspace, node)` describes the files
//! persisted for that node. The index is kept in memory and optionally
//! mirrored to one JSON file per record, so cache hits survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::storage::{FileType, SavedFile};
use crate::error::Result;
use crate::types::NodeType;

/// One file recorded in a metadata entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub relative_path: String,
    pub file_type: FileType,
    pub size: u64,
}

/// Index entry for a node's persisted artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: Uuid,
    pub workspace_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    /// Files in output order
    pub files: Vec<StoredFile>,
    pub file_count: usize,
    pub total_size: u64,
    /// Parameters the artifacts were generated with
    #[serde(default)]
    pub generation_params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileMetadata {
    pub fn new(
        workspace_id: &str,
        node_id: &str,
        node_type: NodeType,
        saved: Vec<(SavedFile, FileType)>,
        generation_params: serde_json::Value,
    ) -> Self {
        let files: Vec<StoredFile> = saved
            .into_iter()
            .map(|(file, file_type)| StoredFile {
                relative_path: file.relative_path,
                file_type,
                size: file.size,
            })
            .collect();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.to_string(),
            node_id: node_id.to_string(),
            node_type,
            file_count: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            files,
            generation_params,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn relative_paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.relative_path.as_str())
    }
}

fn index_key(workspace_id: &str, node_id: &str) -> (String, String) {
    (workspace_id.to_string(), node_id.to_string())
}

/// In-memory metadata index with optional file persistence.
///
/// # Example
///
/// ```ignore
/// use node_engine::MetadataIndex;
///
/// let index = MetadataIndex::with_persistence(".canvas/cache-index");
/// let count = index.load_from_disk()?;
/// println!("Loaded {} cache entries", count);
/// ```
#[derive(Debug, Default)]
pub struct MetadataIndex {
    entries: RwLock<HashMap<(String, String), FileMetadata>>,
    persist_path: Option<PathBuf>,
}

impl MetadataIndex {
    /// Create an index without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index that persists entries to the given directory.
    ///
    /// The directory will be created if it doesn't exist when saving.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persist_path: Some(path.as_ref().to_path_buf()),
        }
    }

    /// Load all entries from the persistence directory.
    ///
    /// Returns the number of entries loaded. Unparseable files are skipped.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let Some(ref path) = self.persist_path else {
            return Ok(0);
        };

        if !tokio::fs::try_exists(path).await? {
            return Ok(0);
        }

        let mut loaded = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_path = entry.path();
            if file_path.extension().is_some_and(|e| e == "json") {
                let content = tokio::fs::read_to_string(&file_path).await?;
                match serde_json::from_str::<FileMetadata>(&content) {
                    Ok(meta) => loaded.push(meta),
                    Err(e) => {
                        log::warn!("Failed to parse cache metadata from {:?}: {}", file_path, e);
                    }
                }
            }
        }

        let count = loaded.len();
        {
            let mut entries = self.entries.write();
            for meta in loaded {
                entries.insert(index_key(&meta.workspace_id, &meta.node_id), meta);
            }
        }
        log::info!("Loaded {} cache metadata entries from {:?}", count, path);
        Ok(count)
    }

    async fn save_to_disk(&self, meta: &FileMetadata) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        tokio::fs::create_dir_all(path).await?;
        let file_path = path.join(format!("{}.json", meta.id));
        let content = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(&file_path, content).await?;
        log::debug!("Saved cache metadata for node '{}' to {:?}", meta.node_id, file_path);
        Ok(())
    }

    async fn delete_from_disk(&self, id: &Uuid) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let file_path = path.join(format!("{}.json", id));
        if tokio::fs::try_exists(&file_path).await? {
            tokio::fs::remove_file(&file_path).await?;
        }
        Ok(())
    }

    pub fn get(&self, workspace_id: &str, node_id: &str) -> Option<FileMetadata> {
        self.entries.read().get(&index_key(workspace_id, node_id)).cloned()
    }

    /// Insert or replace the entry for a node, keeping its original
    /// creation time and id.
    pub async fn upsert(&self, mut meta: FileMetadata) -> Result<FileMetadata> {
        let key = index_key(&meta.workspace_id, &meta.node_id);
        {
            let entries = self.entries.read();
            if let Some(existing) = entries.get(&key) {
                meta.id = existing.id;
                meta.created_at = existing.created_at;
                meta.updated_at = Utc::now();
            }
        }
        self.save_to_disk(&meta).await?;
        self.entries.write().insert(key, meta.clone());
        Ok(meta)
    }

    /// Remove the entry for one node in one workspace
    pub async fn remove(&self, workspace_id: &str, node_id: &str) -> Result<Option<FileMetadata>> {
        let removed = self.entries.write().remove(&index_key(workspace_id, node_id));
        if let Some(ref meta) = removed {
            self.delete_from_disk(&meta.id).await?;
        }
        Ok(removed)
    }

    /// Remove the entries for a node in every workspace
    pub async fn remove_node(&self, node_id: &str) -> Result<Vec<FileMetadata>> {
        let removed: Vec<FileMetadata> = {
            let mut entries = self.entries.write();
            let keys: Vec<_> = entries.keys().filter(|(_, n)| n == node_id).cloned().collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        for meta in &removed {
            self.delete_from_disk(&meta.id).await?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ws: &str, node: &str) -> FileMetadata {
        FileMetadata::new(
            ws,
            node,
            NodeType::ImageGenerator,
            vec![(
                SavedFile {
                    relative_path: format!("{ws}/{node}/000-image.url"),
                    size: 10,
                },
                FileType::Image,
            )],
            serde_json::json!({"prompt": "a cat"}),
        )
    }

    #[tokio::test]
    async fn test_in_memory_index() {
        let index = MetadataIndex::new();
        index.upsert(meta("ws", "n1")).await.unwrap();
        index.upsert(meta("ws2", "n1")).await.unwrap();
        index.upsert(meta("ws", "n2")).await.unwrap();

        let entry = index.get("ws", "n1").unwrap();
        assert_eq!(entry.file_count, 1);
        assert_eq!(entry.total_size, 10);

        assert_eq!(index.remove_node("n1").await.unwrap().len(), 2);
        assert!(index.get("ws", "n1").is_none());
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity() {
        let index = MetadataIndex::new();
        let first = index.upsert(meta("ws", "n1")).await.unwrap();
        let second = index.upsert(meta("ws", "n1")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_index() {
        let dir = tempfile::tempdir().unwrap();

        let index = MetadataIndex::with_persistence(dir.path());
        index.upsert(meta("ws", "n1")).await.unwrap();
        index.upsert(meta("ws", "n2")).await.unwrap();
        index.remove("ws", "n2").await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), "{").unwrap();

        let reloaded = MetadataIndex::with_persistence(dir.path());
        assert_eq!(reloaded.load_from_disk().await.unwrap(), 1);
        assert_eq!(
            reloaded.get("ws", "n1").unwrap().generation_params["prompt"],
            "a cat"
        );
    }
}
