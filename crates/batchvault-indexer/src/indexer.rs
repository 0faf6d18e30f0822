//! The indexer: owns the version index and the storage root.
//!
//! Every artifact enters the index in two steps. [`Indexer::create_entry`]
//! stages the entry (version and storage URL) without touching the index,
//! the caller performs the side effect, and [`Indexer::commit`] inserts the
//! entry. Dropping a [`PendingEntry`] abandons it.

use crate::codec::{self, VersionRecord};
use crate::index::{Entry, Index};
use crate::scanner::{EntryKind, Walker};
use crate::storage;
use crate::IndexerError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the marker file that completes a staging folder.
///
/// It doubles as the logical name whose version history is the commit-id
/// sequence.
pub const COMMIT_MARKER: &str = "COMMIT";

/// An entry staged for insertion but not yet part of the index.
#[derive(Debug, Clone)]
#[must_use = "a staged entry is only indexed once committed"]
pub struct PendingEntry {
    name: String,
    entry: Entry,
}

impl PendingEntry {
    /// Logical name the entry will be filed under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry as it will be inserted.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Storage URL relative to the storage root.
    pub fn url(&self) -> &str {
        &self.entry.url
    }
}

/// Outcome of ingesting one staging folder.
#[derive(Debug)]
pub struct IngestReport {
    /// Folder that was ingested
    pub folder: PathBuf,
    /// Commit id shared by every file of the batch
    pub commit: i64,
    /// Logical names committed, in processing order
    pub committed: Vec<String>,
    /// Files left in staging because they could not be stored
    pub failed: Vec<(PathBuf, IndexerError)>,
}

impl IngestReport {
    fn new(folder: &Path, commit: i64) -> Self {
        Self {
            folder: folder.to_path_buf(),
            commit,
            committed: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Whether every file of the batch was stored.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Versioned artifact indexer over a storage root.
#[derive(Debug, Clone)]
pub struct Indexer {
    root: PathBuf,
    index: Index,
}

impl Indexer {
    /// Create an indexer with an empty index.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_index(Index::new(), root)
    }

    /// Create an indexer around an existing index.
    pub fn with_index(index: Index, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index,
        }
    }

    /// Rebuild a fresh indexer from the files under `root`.
    pub fn rebuilt(root: impl Into<PathBuf>) -> Result<Self, IndexerError> {
        let mut indexer = Self::new(root);
        indexer.rebuild_from_storage()?;
        Ok(indexer)
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The version index.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Version the next entry for `name` will take.
    pub fn next_version(&self, name: &str) -> Result<i64, IndexerError> {
        self.index
            .next_version(name)
            .ok_or_else(|| IndexerError::VersionOverflow(name.to_string()))
    }

    /// Stage an entry for `name` without touching the index.
    ///
    /// When `version` is `None` the next version of `name` is used.
    pub fn create_entry(
        &self,
        name: &str,
        commit: i64,
        version: Option<i64>,
    ) -> Result<PendingEntry, IndexerError> {
        let version = match version {
            Some(version) => version,
            None => self.next_version(name)?,
        };
        let url = codec::encode(&VersionRecord::new(name, version, commit));

        Ok(PendingEntry {
            name: name.to_string(),
            entry: Entry {
                version,
                commit,
                url,
            },
        })
    }

    /// Insert a staged entry into the index.
    pub fn commit(&mut self, pending: PendingEntry) -> Entry {
        let PendingEntry { name, entry } = pending;
        self.index.insert(&name, entry.clone());
        entry
    }

    /// Stage an entry, run `side_effect` with it, and commit only on success.
    pub fn with_entry<F>(
        &mut self,
        name: &str,
        commit: i64,
        version: Option<i64>,
        side_effect: F,
    ) -> Result<Entry, IndexerError>
    where
        F: FnOnce(&Entry) -> Result<(), IndexerError>,
    {
        let pending = self.create_entry(name, commit, version)?;
        side_effect(pending.entry())?;
        Ok(self.commit(pending))
    }

    /// Discard the index and rebuild it from the filenames under the root.
    ///
    /// Files whose names do not decode are logged and left out of the index;
    /// they stay on disk untouched.
    pub fn rebuild_from_storage(&mut self) -> Result<(), IndexerError> {
        self.index = Index::new();

        let files = Walker::new(&self.root).walk()?;
        let mut skipped = 0usize;

        for file in files {
            if storage::is_snapshot_artifact(&file.relative) {
                debug!(path = ?file.relative, "Skipping snapshot file");
                continue;
            }
            if file.kind == EntryKind::Other {
                warn!(path = ?file.relative, "Skipping special file in storage");
                skipped += 1;
                continue;
            }

            let record = match codec::logical_name(&file.relative)
                .ok_or_else(|| {
                    IndexerError::MalformedName(file.relative.display().to_string())
                })
                .and_then(|stored| Self::decode_canonical(&stored))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = ?file.relative, error = %e, "Unrecognized storage format");
                    skipped += 1;
                    continue;
                }
            };

            // The file is already at its final location
            let pending = self.create_entry(&record.path, record.commit, Some(record.version))?;
            self.commit(pending);
        }

        info!(
            root = ?self.root,
            names = self.index.len(),
            entries = self.index.entry_count(),
            skipped,
            "Rebuilt index from storage"
        );

        Ok(())
    }

    /// Decode a stored filename, rejecting names that would not re-encode to
    /// themselves (such as `01__1__x`), since the index could not point at them.
    fn decode_canonical(stored: &str) -> Result<VersionRecord, IndexerError> {
        let record = codec::decode(stored)?;
        if codec::encode(&record) != stored {
            return Err(IndexerError::MalformedName(stored.to_string()));
        }
        Ok(record)
    }

    /// Move a committed staging folder into storage.
    ///
    /// Every file in `folder`, the `COMMIT` marker included, is stored under
    /// its next version with one shared commit id. Files are moved and
    /// committed one by one: a file that cannot be moved is reported and left
    /// in staging while the rest of the batch proceeds. Symlinks are moved as
    /// links; sockets, FIFOs and device nodes are reported and left in place.
    ///
    /// Fails without side effects when the marker is missing or the commit
    /// counter is exhausted.
    pub fn ingest(&mut self, folder: &Path) -> Result<IngestReport, IndexerError> {
        if !folder.join(COMMIT_MARKER).is_file() {
            return Err(IndexerError::MissingCommitMarker(folder.to_path_buf()));
        }

        let files = Walker::new(folder).walk()?;
        let commit = self.next_version(COMMIT_MARKER)?;
        let mut report = IngestReport::new(folder, commit);

        info!(folder = ?folder, commit, files = files.len(), "Ingesting folder");

        for file in files {
            if file.kind == EntryKind::Other {
                let e = IndexerError::UnsupportedFileType(file.path.clone());
                warn!(path = ?file.path, error = %e, "Cannot store staged file");
                report.failed.push((file.path, e));
                continue;
            }

            let Some(name) = codec::logical_name(&file.relative) else {
                let e = IndexerError::MalformedName(file.relative.display().to_string());
                warn!(path = ?file.path, error = %e, "Cannot name staged file");
                report.failed.push((file.path, e));
                continue;
            };

            let root = self.root.clone();
            let stored = self.with_entry(&name, commit, None, |entry| {
                move_file(&file.path, &root.join(&entry.url))
            });

            match stored {
                Ok(entry) => {
                    debug!(name = %name, version = entry.version, url = %entry.url, "Stored");
                    report.committed.push(name);
                }
                Err(e) => {
                    warn!(path = ?file.path, error = %e, "Failed to store file, left in staging");
                    report.failed.push((file.path, e));
                }
            }
        }

        info!(
            folder = ?folder,
            commit,
            stored = report.committed.len(),
            failed = report.failed.len(),
            "Ingested folder"
        );

        Ok(report)
    }

    /// Look up an entry.
    ///
    /// Without a version the current (last) entry is returned; otherwise the
    /// first entry with exactly that version.
    pub fn get(&self, name: &str, version: Option<i64>) -> Result<&Entry, IndexerError> {
        let history = self.history(name)?;
        let found = match version {
            None => history.last(),
            Some(v) => history.iter().find(|entry| entry.version == v),
        };
        found.ok_or_else(|| IndexerError::NoSuchVersion {
            name: name.to_string(),
            version: version.unwrap_or_default(),
        })
    }

    /// Full version history of a name, oldest first.
    pub fn history(&self, name: &str) -> Result<&[Entry], IndexerError> {
        self.index
            .history(name)
            .ok_or_else(|| IndexerError::NoSuchName(name.to_string()))
    }

    /// Absolute path of an entry's stored file.
    pub fn resolve(&self, entry: &Entry) -> PathBuf {
        self.root.join(&entry.url)
    }

    /// Serialize the index into snapshot bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, IndexerError> {
        Ok(serde_json::to_vec(&self.index)?)
    }

    /// Restore an indexer from snapshot bytes.
    pub fn deserialize(snapshot: &[u8], root: impl Into<PathBuf>) -> Result<Self, IndexerError> {
        let index: Index = serde_json::from_slice(snapshot)
            .map_err(|e| IndexerError::SnapshotLoad(e.to_string()))?;
        Ok(Self::with_index(index, root))
    }
}

/// Move a file or symlink, creating the destination's parent directories.
///
/// Falls back to copy and remove when a rename is not possible, e.g. across
/// filesystems. A failed fallback never leaves a partial file at `dst`.
fn move_file(src: &Path, dst: &Path) -> Result<(), IndexerError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    if let Err(e) = copy_entry(src, dst) {
        let _ = fs::remove_file(dst);
        return Err(e.into());
    }
    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(dst);
        return Err(e.into());
    }

    Ok(())
}

/// Copy a regular file, or recreate a symlink pointing at the same target.
fn copy_entry(src: &Path, dst: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if fs::symlink_metadata(src)?.file_type().is_symlink() {
            return std::os::unix::fs::symlink(fs::read_link(src)?, dst);
        }
    }
    fs::copy(src, dst).map(drop)
}
