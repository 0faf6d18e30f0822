//! Snapshot store for the version index.

use super::{write_durable, SNAPSHOT_FILE};
use crate::{Indexer, IndexerError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a loaded index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Read from the persisted snapshot
    Snapshot,
    /// Reconstructed from the storage filenames
    Rebuilt,
}

/// Loads and persists the index snapshot of one storage root.
///
/// Writes go through a single writer lock and the snapshot bytes are taken
/// only once the lock is held, so the last finished write always carries
/// every mutation made before it started.
pub struct SnapshotStore {
    root: PathBuf,
    writer: Mutex<()>,
}

impl SnapshotStore {
    /// Create a snapshot store for a storage root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: Mutex::new(()),
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    /// Whether a snapshot has been written.
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Load the index from the snapshot.
    pub fn load(&self) -> Result<Indexer, IndexerError> {
        let path = self.path();
        let bytes = std::fs::read(&path)
            .map_err(|e| IndexerError::SnapshotLoad(format!("{}: {}", path.display(), e)))?;
        let indexer = Indexer::deserialize(&bytes, &self.root)?;

        debug!(
            path = ?path,
            names = indexer.index().len(),
            "Loaded snapshot"
        );

        Ok(indexer)
    }

    /// Load the snapshot, falling back to a rebuild from storage when it is
    /// missing or unreadable.
    pub fn load_or_rebuild(&self) -> Result<(Indexer, LoadSource), IndexerError> {
        if self.exists() {
            match self.load() {
                Ok(indexer) => return Ok((indexer, LoadSource::Snapshot)),
                Err(e) => warn!(error = %e, "Snapshot unusable, rebuilding from storage"),
            }
        } else {
            info!(root = ?self.root, "No snapshot found, rebuilding from storage");
        }

        let indexer = Indexer::rebuilt(&self.root)?;
        Ok((indexer, LoadSource::Rebuilt))
    }

    /// Persist the index.
    pub async fn persist(&self, indexer: &Indexer) -> Result<(), IndexerError> {
        self.persist_with(|| indexer.serialize()).await
    }

    /// Persist the snapshot produced by `capture`.
    ///
    /// `capture` runs while the writer lock is held, so it should read the
    /// latest shared index state rather than a copy taken earlier.
    pub async fn persist_with<F>(&self, capture: F) -> Result<(), IndexerError>
    where
        F: FnOnce() -> Result<Vec<u8>, IndexerError>,
    {
        let _writer = self.writer.lock().await;
        let bytes = capture()?;
        self.publish(&bytes).await
    }

    /// Persist an index shared behind a lock.
    ///
    /// The index lock is taken on the blocking pool, so waiting for a long
    /// ingestion to release it does not stall an async worker.
    pub async fn persist_shared(
        &self,
        indexer: &Arc<parking_lot::Mutex<Indexer>>,
    ) -> Result<(), IndexerError> {
        let _writer = self.writer.lock().await;
        let indexer = Arc::clone(indexer);
        let bytes = tokio::task::spawn_blocking(move || indexer.lock().serialize())
            .await
            .map_err(|e| IndexerError::TaskJoin(e.to_string()))??;
        self.publish(&bytes).await
    }

    async fn publish(&self, bytes: &[u8]) -> Result<(), IndexerError> {
        write_durable(&self.path(), bytes).await?;
        debug!(path = ?self.path(), size = bytes.len(), "Persisted snapshot");
        Ok(())
    }
}
