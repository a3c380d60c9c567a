//! Artifact storage backends
//!
//! Files are addressed by a relative path of the form
//! `{workspace}/{node}/{index}-{file_type}.{ext}`. Remote URLs are stored
//! as small `.url` files holding the address rather than the bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NodeEngineError, Result};
use crate::types::NodeType;

/// Kind of generated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Text,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Payload of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    /// Remote location (provider CDN or uploaded object)
    Url(String),
    /// Inline bytes
    Bytes { mime_type: String, bytes: Vec<u8> },
    Text(String),
}

/// One generated output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_type: FileType,
    pub content: ArtifactContent,
}

impl Artifact {
    pub fn url(file_type: FileType, url: impl Into<String>) -> Self {
        Self {
            file_type,
            content: ArtifactContent::Url(url.into()),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            file_type: FileType::Text,
            content: ArtifactContent::Text(text.into()),
        }
    }

    pub fn bytes(file_type: FileType, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_type,
            content: ArtifactContent::Bytes {
                mime_type: mime_type.into(),
                bytes,
            },
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Url(url) => Some(url),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            ArtifactContent::Text(text) => Some(text),
            _ => None,
        }
    }

    fn extension(&self) -> &str {
        match &self.content {
            ArtifactContent::Url(_) => "url",
            ArtifactContent::Text(_) => "txt",
            ArtifactContent::Bytes { mime_type, .. } => extension_for_mime(mime_type),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match &self.content {
            ArtifactContent::Url(url) => url.as_bytes().to_vec(),
            ArtifactContent::Text(text) => text.as_bytes().to_vec(),
            ArtifactContent::Bytes { bytes, .. } => bytes.clone(),
        }
    }

    fn decode(relative_path: &str, raw: Vec<u8>) -> Result<Self> {
        let (file_type, ext) = parse_file_name(relative_path)
            .ok_or_else(|| NodeEngineError::storage(format!("Unrecognized artifact path: {}", relative_path)))?;
        let as_string = |raw: Vec<u8>| {
            String::from_utf8(raw)
                .map_err(|e| NodeEngineError::storage(format!("Corrupt artifact {}: {}", relative_path, e)))
        };
        let content = match ext {
            "url" => ArtifactContent::Url(as_string(raw)?),
            "txt" => ArtifactContent::Text(as_string(raw)?),
            other => ArtifactContent::Bytes {
                mime_type: mime_for_extension(other).to_string(),
                bytes: raw,
            },
        };
        Ok(Self { file_type, content })
    }
}

/// Options for [`ArtifactStorage::save_file`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Position of the artifact among the node's outputs
    pub index: usize,
}

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub relative_path: String,
    pub size: u64,
}

/// A stored file belonging to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub relative_path: String,
    pub file_type: FileType,
    pub size: u64,
}

/// Where artifacts are written
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn save_file(
        &self,
        workspace_id: &str,
        node_id: &str,
        node_type: NodeType,
        artifact: &Artifact,
        options: &SaveOptions,
    ) -> Result<SavedFile>;

    async fn read_file(&self, relative_path: &str) -> Result<Artifact>;

    /// Files stored for a node, ordered by index
    async fn get_files_by_node(&self, workspace_id: &str, node_id: &str) -> Result<Vec<FileRef>>;

    async fn delete_file(&self, relative_path: &str) -> Result<()>;

    /// Read a file as something an `<img>`/`<video>` tag can load: URLs are
    /// returned as-is, inline content as a base64 `data:` URL.
    async fn read_file_as_data_url(&self, relative_path: &str) -> Result<String> {
        let artifact = self.read_file(relative_path).await?;
        Ok(match artifact.content {
            ArtifactContent::Url(url) => url,
            ArtifactContent::Text(text) => data_url("text/plain", text.as_bytes()),
            ArtifactContent::Bytes { mime_type, bytes } => data_url(&mime_type, &bytes),
        })
    }
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Encode an id as one path segment. Bytes outside `[A-Za-z0-9_-]` become
/// `%XX` and the empty id becomes `%`, so distinct ids never share a
/// directory and no id can escape the root.
pub(crate) fn encode_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push_str(&hex::encode_upper([byte]));
        }
    }
    encoded
}

fn node_dir(workspace_id: &str, node_id: &str) -> String {
    format!("{}/{}", encode_segment(workspace_id), encode_segment(node_id))
}

fn relative_path_for(workspace_id: &str, node_id: &str, artifact: &Artifact, index: usize) -> String {
    format!(
        "{}/{:03}-{}.{}",
        node_dir(workspace_id, node_id),
        index,
        artifact.file_type.as_str(),
        artifact.extension()
    )
}

/// Split `.../{index}-{type}.{ext}` into file type and extension
fn parse_file_name(relative_path: &str) -> Option<(FileType, &str)> {
    let file_name = relative_path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    let (_, file_type) = stem.split_once('-')?;
    Some((FileType::parse(file_type)?, ext))
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        _ => "bin",
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Filesystem backend
// =============================================================================

/// Stores artifacts under a root directory
pub struct FsArtifactStorage {
    root: PathBuf,
}

impl FsArtifactStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        if relative_path.split('/').any(|s| s == ".." || s.is_empty()) {
            return Err(NodeEngineError::storage(format!("Invalid artifact path: {}", relative_path)));
        }
        Ok(self.root.join(relative_path))
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn save_file(
        &self,
        workspace_id: &str,
        node_id: &str,
        node_type: NodeType,
        artifact: &Artifact,
        options: &SaveOptions,
    ) -> Result<SavedFile> {
        let relative_path = relative_path_for(workspace_id, node_id, artifact, options.index);
        let path = self.resolve(&relative_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = artifact.encode();
        tokio::fs::write(&path, &bytes).await?;
        log::debug!("Saved {} artifact for {} node '{}' to {:?}", artifact.file_type.as_str(), node_type, node_id, path);
        Ok(SavedFile {
            relative_path,
            size: bytes.len() as u64,
        })
    }

    async fn read_file(&self, relative_path: &str) -> Result<Artifact> {
        let raw = tokio::fs::read(self.resolve(relative_path)?).await?;
        Artifact::decode(relative_path, raw)
    }

    async fn get_files_by_node(&self, workspace_id: &str, node_id: &str) -> Result<Vec<FileRef>> {
        let dir_rel = node_dir(workspace_id, node_id);
        let dir = self.root.join(&dir_rel);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let relative_path = format!("{}/{}", dir_rel, name);
            match parse_file_name(&relative_path) {
                Some((file_type, _)) => files.push(FileRef {
                    relative_path,
                    file_type,
                    size: entry.metadata().await?.len(),
                }),
                None => log::warn!("Ignoring unrecognized file {:?}", entry.path()),
            }
        }
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    async fn delete_file(&self, relative_path: &str) -> Result<()> {
        let path = self.resolve(relative_path)?;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            log::debug!("Deleted artifact {:?}", path);
        }
        Ok(())
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-memory storage for tests and hosts without a filesystem.
///
/// Reads and writes can be made to fail to exercise degraded cache paths.
#[derive(Default)]
pub struct MemoryArtifactStorage {
    files: Mutex<BTreeMap<String, Artifact>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryArtifactStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

#[async_trait]
impl ArtifactStorage for MemoryArtifactStorage {
    async fn save_file(
        &self,
        workspace_id: &str,
        node_id: &str,
        _node_type: NodeType,
        artifact: &Artifact,
        options: &SaveOptions,
    ) -> Result<SavedFile> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NodeEngineError::storage("write failed"));
        }
        let relative_path = relative_path_for(workspace_id, node_id, artifact, options.index);
        let size = artifact.encode().len() as u64;
        self.files.lock().insert(relative_path.clone(), artifact.clone());
        Ok(SavedFile { relative_path, size })
    }

    async fn read_file(&self, relative_path: &str) -> Result<Artifact> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(NodeEngineError::storage("read failed"));
        }
        self.files
            .lock()
            .get(relative_path)
            .cloned()
            .ok_or_else(|| NodeEngineError::storage(format!("No such artifact: {}", relative_path)))
    }

    async fn get_files_by_node(&self, workspace_id: &str, node_id: &str) -> Result<Vec<FileRef>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(NodeEngineError::storage("read failed"));
        }
        let prefix = format!("{}/", node_dir(workspace_id, node_id));
        Ok(self
            .files
            .lock()
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, artifact)| FileRef {
                relative_path: path.clone(),
                file_type: artifact.file_type,
                size: artifact.encode().len() as u64,
            })
            .collect())
    }

    async fn delete_file(&self, relative_path: &str) -> Result<()> {
        self.files.lock().remove(relative_path);
        Ok(())
    }
}
