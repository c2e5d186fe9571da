//! Storage trait abstraction.

use async_trait::async_trait;
use picalc_core::{EstimatorParams, SampleEntry};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Storage abstraction for the estimator's persisted state.
///
/// Writes replace the stored value as a whole. Callers are expected to
/// serialize writers; implementations only guarantee that each write is
/// all-or-nothing.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the last fitted parameters, if any were saved.
    async fn load_params(&self) -> Result<Option<EstimatorParams>>;

    /// Replace the fitted parameters.
    async fn save_params(&self, params: &EstimatorParams) -> Result<()>;

    /// Load retained samples.
    async fn load_samples(&self) -> Result<Vec<SampleEntry>>;

    /// Replace retained samples.
    async fn save_samples(&self, samples: &[SampleEntry]) -> Result<()>;
}
