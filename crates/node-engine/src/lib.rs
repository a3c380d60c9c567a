//! Node Engine - dependency-ordered execution of generation graphs
//!
//! This crate runs a canvas of typed generation nodes. It supports:
//!
//! - Topological batch execution (Kahn's algorithm, strictly sequential)
//! - A per-node-type service contract with contained failures
//! - Artifact caching keyed by node, with soft invalidation
//! - Per-owner FIFO task queues for multi-stage generations
//!
//! # Architecture
//!
//! - `NodeServiceRegistry`: maps node types to services, runs batches
//! - `ExecutionContext`: graph snapshot plus the mutation callbacks
//! - `ArtifactCache`: lookup-before-generate in front of provider calls
//! - `EventSink`: generic event streaming (not tied to any UI)
//!
//! Model selection and fallback live in the `model-router` crate; the
//! concrete services live in `workflow-nodes`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use node_engine::{NodeServiceRegistry, Providers, RecordingUpdateSink, ServiceDeps};
//!
//! let deps = Arc::new(ServiceDeps::in_memory(Providers::new().with_image(client), "workspace-1"));
//! let registry = NodeServiceRegistry::with_builtins(deps);
//! let report = registry
//!     .execute_nodes_in_order(&graph.nodes, &graph.connections, Arc::new(RecordingUpdateSink::new()), None)
//!     .await;
//! ```

pub mod cache;
pub mod context;
pub mod data;
pub mod deps;
pub mod error;
pub mod events;
pub mod generation_state;
pub mod keyed_lock;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod types;

// Re-export key types
pub use cache::{
    Artifact, ArtifactCache, ArtifactContent, ArtifactStorage, CacheConfig, CacheKey, CachedArtifacts,
    FileMetadata, FileRef, FileType, FsArtifactStorage, GeneratedArtifacts, MemoryArtifactStorage,
    MetadataIndex,
};
pub use context::{ExecutionContext, NodeUpdate, NodeUpdateSink, NullUpdateSink, RecordingUpdateSink};
pub use data::{
    AudioGeneratorData, CharacterData, CharacterProfile, GenerationInfo, ImageGeneratorData, NodeData,
    NodeVariant, PromptInputData, ScriptPlannerData, Shot, ShotClip, ShotPrompt, StoryboardPhase,
    StoryboardVideoData, VideoGeneratorData,
};
pub use deps::{Providers, ServiceDeps};
pub use error::{NodeEngineError, Result};
pub use events::{EventError, EventSink, ExecutionEvent, NullEventSink, VecEventSink};
pub use generation_state::{
    CharacterGenerationState, CharacterStage, GenerationKey, GenerationStateStore, StageState, StageStatus,
};
pub use keyed_lock::KeyedLocks;
pub use queue::{OwnerTaskQueue, TaskHandle};
pub use registry::{BatchExecutionReport, NodeServiceRegistry, ProgressCallback, ServiceRegistration};
pub use schedule::{topological_order, ExecutionOrder};
pub use service::{NodeExecutionResult, NodeService, ValidationResult};
pub use types::{Connection, Node, NodeId, NodeStatus, NodeType, WorkflowGraph};

// Re-export inventory so node crates can register services
pub use inventory;
