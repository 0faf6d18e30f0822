//! Core error types for batchvault.

use batchvault_indexer::IndexerError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Indexing, storage or watch failure
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// A required directory cannot be written to
    #[error("Cannot write to location {}: {reason}", .path.display())]
    NotWritable { path: PathBuf, reason: String },

    /// A blocking ingestion task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
