//! Error types for model routing and provider calls

use thiserror::Error;

use crate::catalog::ModelId;

/// Result type alias using RouterError
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors produced by providers, the fallback executor and settings storage
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// Provider rejected the call because of quota, rate limit or billing
    #[error("Quota exhausted for model '{model}': {message}")]
    Quota { model: ModelId, message: String },

    /// Any other provider-reported failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Polling exceeded its budget
    #[error("Generation timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    /// Aborted through the cancellation token
    #[error("Generation cancelled")]
    Cancelled,

    /// Every model in the category's priority chain was tried
    #[error("No fallback model available (tried: {})", chain.join(" -> "))]
    ExhaustedFallback { chain: Vec<ModelId> },

    /// The model id is not in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(ModelId),

    /// No provider is configured for the requested capability
    #[error("No provider configured for {0}")]
    ProviderMissing(String),

    /// Settings could not be read or written
    #[error("Settings persistence error: {0}")]
    Persistence(String),
}

impl RouterError {
    /// Create a provider error with a message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Whether this error should end a fallback chain without advancing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
