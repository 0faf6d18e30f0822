//! batchvault indexer
//!
//! This crate provides the versioned indexing engine for batchvault:
//! - Storage filename codec (`{version}__{commit}__{name}`)
//! - Per-name version index with ordered insertion
//! - Ingestion of committed staging folders and rebuild from storage
//! - Snapshot persistence with atomic replace
//! - Directory watching for commit detection

pub mod codec;
mod error;
pub mod index;
pub mod indexer;
pub mod scanner;
pub mod storage;
pub mod watcher;

pub use codec::{VersionRecord, DELIMITER};
pub use error::IndexerError;
pub use index::{Entry, Index};
pub use indexer::{IngestReport, Indexer, PendingEntry, COMMIT_MARKER};
pub use storage::{LoadSource, SnapshotStore, SNAPSHOT_FILE};
pub use watcher::{
    ChannelWatchSource, NotifyWatchSource, WatchEvent, WatchEventKind, WatchMask, WatchSource,
    WatchStream,
};
