//! Persistence layer for the version index.
//!
//! The index is persisted as a JSON snapshot at the storage root. Snapshots
//! are always published atomically: written to a temp file next to the
//! target, synced, then renamed into place.

mod snapshot;

pub use snapshot::{LoadSource, SnapshotStore};

use crate::IndexerError;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Snapshot filename at the storage root.
pub const SNAPSHOT_FILE: &str = "index.json";

/// Whether a path relative to the storage root is the snapshot or one of its
/// in-flight temp files.
pub fn is_snapshot_artifact(relative: &Path) -> bool {
    let mut components = relative.components();
    let (Some(Component::Normal(name)), None) = (components.next(), components.next()) else {
        return false;
    };
    let Some(name) = name.to_str() else {
        return false;
    };
    name == SNAPSHOT_FILE
        || (name.starts_with(&temp_prefix(SNAPSHOT_FILE)) && name.ends_with(".tmp"))
}

fn temp_prefix(file_name: &str) -> String {
    format!(".{file_name}.")
}

fn temp_path(path: &Path) -> Result<PathBuf, IndexerError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IndexerError::NotFound(path.to_path_buf()))?;
    let temp_name = format!("{}{}.tmp", temp_prefix(file_name), uuid::Uuid::new_v4());
    Ok(path.with_file_name(temp_name))
}

/// Atomically replace `path` with `bytes`.
///
/// Readers see either the previous content or the full new content, also
/// across a crash: the data is synced before the rename publishes it.
pub async fn write_durable(path: &Path, bytes: &[u8]) -> Result<(), IndexerError> {
    let temp = temp_path(path)?;

    let written = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }

    debug!(path = ?path, size = bytes.len(), "Published file");

    Ok(())
}
