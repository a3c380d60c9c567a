//! Model Router - model selection and degradation for generation providers
//!
//! This crate decides which generative model serves a request and what
//! happens when it fails:
//!
//! - **Catalog / Registry**: static model descriptors per category, priority
//!   ordering with user overrides, deterministic fallback resolution
//! - **Health tracking**: per-model success/failure counters with a
//!   one-hour circuit breaker after three consecutive failures
//! - **Fallback execution**: retry-across-models with bounded attempts
//! - **Providers**: the narrow call interface concrete clients implement,
//!   plus a cancellable submit-then-poll helper
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use model_router::{FallbackConfig, FallbackExecutor, HealthTracker, ModelRegistry};
//!
//! let executor = FallbackExecutor::new(
//!     Arc::new(ModelRegistry::with_builtin_catalog()),
//!     Arc::new(HealthTracker::new()),
//! );
//! let outcome = executor
//!     .execute_with_fallback("sora-2", &FallbackConfig::default(), |model| async move {
//!         provider.generate(&model).await
//!     })
//!     .await;
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod polling;
pub mod provider;
pub mod registry;
pub mod settings;

// Re-exports for convenience
pub use catalog::{builtin_catalog, ModelCategory, ModelId, ModelInfo};
pub use config::{FallbackConfig, PollConfig};
pub use error::{Result, RouterError};
pub use fallback::{FallbackExecutor, FallbackOutcome};
pub use health::{Clock, HealthTracker, ManualClock, ModelHealth, ModelUsageStats, SystemClock};
pub use polling::{poll_video_task, VideoJob, VideoJobResult};
pub use provider::{
    AudioProvider, AudioRequest, ImageOptions, ImageProvider, JobState, ProviderContext,
    SubmittedTask, TaskStatus, TextProvider, TextRequest, VideoProvider, VideoRequest,
};
pub use registry::{is_quota_error, ModelRegistry, QUOTA_KEYWORDS};
pub use settings::{JsonFileSettingsStore, MemorySettingsStore, ModelSettings, SettingsStore};

// Re-export the cancellation primitive threaded through provider calls
pub use tokio_util::sync::CancellationToken;
