//! Daemon lifecycle management.

use anyhow::{Context, Result};
use batchvault_core::{Coordinator, ServiceConfig, SharedIndexer};
use batchvault_indexer::{LoadSource, NotifyWatchSource, SnapshotStore, WatchSource};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::signals;

/// The ingestion daemon
pub struct Daemon {
    config: ServiceConfig,
    watches: Arc<dyn WatchSource>,
    shutdown_tx: broadcast::Sender<()>,
    owns_pid_file: AtomicBool,
}

impl Daemon {
    /// Create a daemon for `config`, preparing and checking its directories
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create storage and staging directories")?;
        config.check_writable()?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            watches: Arc::new(NotifyWatchSource::new()),
            shutdown_tx,
            owns_pid_file: AtomicBool::new(false),
        })
    }

    /// Replace the filesystem watch source
    pub fn with_watch_source(mut self, watches: Arc<dyn WatchSource>) -> Self {
        self.watches = watches;
        self
    }

    /// Sender that stops a running daemon
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the daemon until shutdown
    pub async fn run(&self) -> Result<()> {
        self.acquire_pid_lock()?;

        tracing::info!(
            storage = %self.config.storage_dir.display(),
            staging = %self.config.staging_dir.display(),
            "Daemon starting"
        );

        let result = self.serve().await;
        self.cleanup();
        result
    }

    async fn serve(&self) -> Result<()> {
        let store = Arc::new(SnapshotStore::new(&self.config.storage_dir));
        let indexer = self.load_index(&store).await?;

        let coordinator = Coordinator::new(
            &self.config.staging_dir,
            indexer.clone(),
            store.clone(),
            self.watches.clone(),
        )
        .with_sweep_on_start(self.config.sweep_on_start);

        let coordinator_rx = self.shutdown_tx.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            result = coordinator.run(coordinator_rx) => {
                if let Err(e) = result {
                    tracing::error!("Coordinator error: {}", e);
                }
            }
            _ = signals::wait_for_shutdown(shutdown_rx) => {
                tracing::info!("Shutdown signal received");
            }
        }

        store
            .persist_shared(&indexer)
            .await
            .context("Failed to persist final snapshot")?;

        Ok(())
    }

    /// Load the snapshot or rebuild it, persisting a rebuilt index right away
    async fn load_index(&self, store: &SnapshotStore) -> Result<SharedIndexer> {
        let (indexer, source) = store
            .load_or_rebuild()
            .context("Failed to load index")?;

        tracing::info!(
            names = indexer.index().len(),
            entries = indexer.index().entry_count(),
            source = ?source,
            "Index ready"
        );

        if source == LoadSource::Rebuilt {
            store
                .persist(&indexer)
                .await
                .context("Failed to persist rebuilt index")?;
        }

        Ok(Arc::new(Mutex::new(indexer)))
    }

    /// Acquire PID lock to ensure single instance
    fn acquire_pid_lock(&self) -> Result<()> {
        let pid_file = &self.config.pid_file;

        if pid_file.exists() {
            if let Ok(pid_str) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = pid_str.trim().parse::<u32>() {
                    if is_process_running(pid) {
                        anyhow::bail!("Daemon already running (PID: {})", pid);
                    }
                }
            }
            // Stale
            std::fs::remove_file(pid_file)?;
        }

        if let Some(parent) = pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(pid_file, std::process::id().to_string())?;
        self.owns_pid_file.store(true, Ordering::SeqCst);

        tracing::debug!(pid = std::process::id(), "PID lock acquired");

        Ok(())
    }

    fn cleanup(&self) {
        self.release_pid_lock();
        tracing::info!("Cleanup complete");
    }

    fn release_pid_lock(&self) {
        if self.owns_pid_file.swap(false, Ordering::SeqCst) {
            let _ = std::fs::remove_file(&self.config.pid_file);
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.release_pid_lock();
    }
}

/// Check if a process is running by PID
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks for existence
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
