//! Ingestion coordinator.
//!
//! Watches the staging root for new folders. Each candidate folder gets its
//! own task that waits for the `COMMIT` marker to be closed after writing,
//! ingests the folder and persists the index. A folder moves through
//! `unknown -> waiting -> (ingested | abandoned)`; the waiting set makes sure
//! no folder is tracked twice at the same time.

use crate::CoreError;
use batchvault_indexer::{
    Indexer, IngestReport, SnapshotStore, WatchEvent, WatchEventKind, WatchMask, WatchSource,
    WatchStream, COMMIT_MARKER,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Default quiet period for a marker found already in place.
pub const DEFAULT_MARKER_SETTLE: Duration = Duration::from_millis(250);

/// Index shared between the coordinator and its folder tasks.
pub type SharedIndexer = Arc<Mutex<Indexer>>;

/// How a tracked folder left the waiting set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    /// The folder was ingested under `commit`
    Ingested {
        folder: PathBuf,
        commit: i64,
        stored: usize,
        failed: usize,
        persisted: bool,
    },
    /// The watch ended before a commit was seen
    Abandoned { folder: PathBuf },
    /// Ingestion was attempted and failed
    Failed { folder: PathBuf, reason: String },
}

struct Shared {
    staging_dir: PathBuf,
    indexer: SharedIndexer,
    store: Arc<SnapshotStore>,
    watches: Arc<dyn WatchSource>,
    waiting: Mutex<HashSet<PathBuf>>,
}

/// Drives commit-triggered ingestion for one staging root.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
    sweep_on_start: bool,
    marker_settle: Duration,
}

impl Coordinator {
    /// Create a coordinator for `staging_dir`.
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        indexer: SharedIndexer,
        store: Arc<SnapshotStore>,
        watches: Arc<dyn WatchSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                staging_dir: staging_dir.into(),
                indexer,
                store,
                watches,
                waiting: Mutex::new(HashSet::new()),
            }),
            sweep_on_start: true,
            marker_settle: DEFAULT_MARKER_SETTLE,
        }
    }

    /// Whether folders already in staging are picked up when `run` starts.
    pub fn with_sweep_on_start(mut self, sweep: bool) -> Self {
        self.sweep_on_start = sweep;
        self
    }

    /// How long a marker found already in place must stay unchanged before
    /// the folder is ingested without a close-after-write event.
    pub fn with_marker_settle(mut self, settle: Duration) -> Self {
        self.marker_settle = settle;
        self
    }

    /// Staging root.
    pub fn staging_dir(&self) -> &Path {
        &self.shared.staging_dir
    }

    /// Whether `folder` is currently waiting for its commit.
    pub fn is_waiting(&self, folder: &Path) -> bool {
        self.shared.waiting.lock().contains(folder)
    }

    /// Number of folders waiting for their commit.
    pub fn waiting_count(&self) -> usize {
        self.shared.waiting.lock().len()
    }

    /// Watch the staging root until it disappears or shutdown is requested.
    ///
    /// Outstanding folder tasks are aborted on return. An ingestion already
    /// handed to the blocking pool still runs to completion; persisting the
    /// final index is up to the caller.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), CoreError> {
        let staging_dir = self.shared.staging_dir.clone();
        let mut stream = self
            .shared
            .watches
            .watch(&staging_dir, WatchMask::CREATE_OR_CLOSE)?;
        let mut tasks = JoinSet::new();

        tracing::info!(staging = %staging_dir.display(), "Coordinator started");

        // The staging watch is already open, so nothing created from here on
        // can slip between the sweep and the first event.
        if self.sweep_on_start {
            self.sweep(&mut tasks)?;
        }

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(event) => self.on_event(event, &mut tasks),
                    None => {
                        tracing::warn!(staging = %staging_dir.display(), "Staging watch ended");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(outcome) => log_outcome(&outcome),
                    Err(e) => tracing::error!("Folder task failed: {}", e),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Coordinator stopping");
                    break;
                }
            }
        }

        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(outcome) = joined {
                log_outcome(&outcome);
            }
        }
        self.shared.waiting.lock().clear();

        Ok(())
    }

    /// Track every folder already present in the staging root.
    fn sweep(&self, tasks: &mut JoinSet<FolderOutcome>) -> Result<(), CoreError> {
        let mut found = 0usize;
        for entry in std::fs::read_dir(&self.shared.staging_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                found += 1;
                self.track(path, tasks);
            }
        }
        tracing::info!(folders = found, "Swept staging root");
        Ok(())
    }

    fn on_event(&self, event: WatchEvent, tasks: &mut JoinSet<FolderOutcome>) {
        if event.name.is_empty() {
            return;
        }
        let path = self.shared.staging_dir.join(&event.name);
        if path.is_dir() {
            self.track(path, tasks);
        }
    }

    /// Move `folder` from unknown to waiting and spawn its task.
    fn track(&self, folder: PathBuf, tasks: &mut JoinSet<FolderOutcome>) {
        if !self.shared.waiting.lock().insert(folder.clone()) {
            tracing::debug!(folder = %folder.display(), "Already waiting");
            return;
        }

        let stream = match self
            .shared
            .watches
            .watch(&folder, WatchMask::CLOSE_WRITE)
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "Cannot watch folder");
                self.shared.waiting.lock().remove(&folder);
                return;
            }
        };

        tracing::info!(folder = %folder.display(), "Waiting for commit");
        tasks.spawn(watch_folder(
            self.shared.clone(),
            folder,
            stream,
            self.marker_settle,
        ));
    }
}

/// Wait for the commit marker of one folder, then ingest it.
async fn watch_folder(
    shared: Arc<Shared>,
    folder: PathBuf,
    mut stream: WatchStream,
    marker_settle: Duration,
) -> FolderOutcome {
    // The marker may have been written before the watch was in place
    let committed = if folder.join(COMMIT_MARKER).is_file() {
        tracing::debug!(folder = %folder.display(), "Commit marker already present");
        marker_settled(&folder, &mut stream, marker_settle).await
    } else {
        loop {
            match stream.next().await {
                Some(event) if is_commit(&event) => break true,
                Some(_) => continue,
                None => break false,
            }
        }
    };

    let outcome = if committed {
        ingest_and_persist(&shared, &folder).await
    } else {
        tracing::warn!(folder = %folder.display(), "Discarded folder");
        FolderOutcome::Abandoned {
            folder: folder.clone(),
        }
    };

    shared.waiting.lock().remove(&folder);
    outcome
}

/// Wait until a marker that was already present is complete: either its
/// close-after-write event arrives, or its size and modification time stay
/// unchanged for one `interval`. Returns false if the watch ends first.
async fn marker_settled(folder: &Path, stream: &mut WatchStream, interval: Duration) -> bool {
    let marker = folder.join(COMMIT_MARKER);
    let mut last = marker_state(&marker);

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) if is_commit(&event) => return true,
                Some(_) => {}
                None => return false,
            },
            _ = tokio::time::sleep(interval) => {
                let current = marker_state(&marker);
                if current == last {
                    return true;
                }
                tracing::debug!(folder = %folder.display(), "Commit marker still changing");
                last = current;
            }
        }
    }
}

fn marker_state(marker: &Path) -> Option<(u64, Option<SystemTime>)> {
    std::fs::metadata(marker)
        .ok()
        .map(|m| (m.len(), m.modified().ok()))
}

fn is_commit(event: &WatchEvent) -> bool {
    event.kind == WatchEventKind::CloseWrite && event.name == COMMIT_MARKER
}

async fn ingest_and_persist(shared: &Arc<Shared>, folder: &Path) -> FolderOutcome {
    tracing::info!(folder = %folder.display(), "Indexing");

    let report = match ingest_blocking(shared, folder).await {
        Ok(report) => report,
        Err(e) => {
            return FolderOutcome::Failed {
                folder: folder.to_path_buf(),
                reason: e.to_string(),
            }
        }
    };

    let persisted = match shared.store.persist_shared(&shared.indexer).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(folder = %folder.display(), error = %e, "Failed to persist index");
            false
        }
    };

    FolderOutcome::Ingested {
        folder: folder.to_path_buf(),
        commit: report.commit,
        stored: report.committed.len(),
        failed: report.failed.len(),
        persisted,
    }
}

/// Run the ingestion on the blocking pool while holding the index lock.
async fn ingest_blocking(shared: &Shared, folder: &Path) -> Result<IngestReport, CoreError> {
    let indexer = shared.indexer.clone();
    let target = folder.to_path_buf();
    let report = tokio::task::spawn_blocking(move || indexer.lock().ingest(&target)).await??;
    Ok(report)
}

fn log_outcome(outcome: &FolderOutcome) {
    match outcome {
        FolderOutcome::Ingested {
            folder,
            commit,
            stored,
            failed,
            persisted,
        } => tracing::info!(
            folder = %folder.display(),
            commit,
            stored,
            failed,
            persisted,
            "Folder ingested"
        ),
        FolderOutcome::Abandoned { folder } => {
            tracing::info!(folder = %folder.display(), "Folder abandoned")
        }
        FolderOutcome::Failed { folder, reason } => {
            tracing::error!(folder = %folder.display(), reason = %reason, "Folder ingestion failed")
        }
    }
}
