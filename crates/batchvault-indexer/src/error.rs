//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage filename does not follow the `{version}__{commit}__{name}` scheme
    #[error("Malformed storage name: {0}")]
    MalformedName(String),

    /// A staging folder was ingested without a commit marker
    #[error("Expecting a COMMIT file in {0}")]
    MissingCommitMarker(PathBuf),

    /// Lookup for a name that was never indexed
    #[error("No such name: {0}")]
    NoSuchName(String),

    /// Lookup for a version the name does not have
    #[error("No such version {version} for {name}")]
    NoSuchVersion { name: String, version: i64 },

    /// A name's latest version is `i64::MAX`, so no next version exists
    #[error("Version overflow for {0}")]
    VersionOverflow(String),

    /// Persisted snapshot could not be read or parsed
    #[error("Snapshot load error: {0}")]
    SnapshotLoad(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// A staged entry that is neither a regular file nor a symlink
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    TaskJoin(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<notify::Error> for IndexerError {
    fn from(e: notify::Error) -> Self {
        IndexerError::Watcher(e.to_string())
    }
}
