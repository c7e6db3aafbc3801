//! Storage trait abstraction.

use async_trait::async_trait;
use metaevo_core::{Generation, RunId, RunReport};

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
}

/// Durable storage for run artifacts.
///
/// This trait allows different storage backends to be plugged in.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Checkpoint a finished generation.
    async fn save_generation(&self, run_id: RunId, generation: &Generation) -> Result<()>;

    /// Persist the final report and best metaprompt.
    async fn save_report(&self, report: &RunReport) -> Result<()>;

    /// Load a previously saved report.
    async fn load_report(&self, run_id: RunId) -> Result<Option<RunReport>>;

    /// List runs with a saved report.
    async fn list_runs(&self) -> Result<Vec<RunId>>;
}
