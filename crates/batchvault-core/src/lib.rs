//! batchvault Core Components
//!
//! This crate provides the service-level pieces of batchvault: the
//! configuration and the ingestion coordinator that turns staging-folder
//! commits into indexed, stored batches.

mod config;
mod coordinator;
mod error;

pub use config::{check_writable, ServiceConfig};
pub use coordinator::{Coordinator, FolderOutcome, SharedIndexer, DEFAULT_MARKER_SETTLE};
pub use error::CoreError;
