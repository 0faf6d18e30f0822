//! Directory watching.
//!
//! A [`WatchSource`] turns a directory into a stream of [`WatchEvent`]s for
//! its direct children. The stream ends when the watch is invalidated, for
//! example when the watched directory is removed.
//!
//! [`NotifyWatchSource`] is backed by inotify on Linux (FSEvents on macOS).
//! [`ChannelWatchSource`] is fed by hand and lets callers drive the event
//! sequence themselves.

use crate::IndexerError;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Kind of a directory event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// An entry was created
    Create,
    /// An entry was moved into the directory
    MovedIn,
    /// A file opened for writing was closed
    CloseWrite,
    /// A file opened read-only was closed
    CloseNoWrite,
}

/// Set of event kinds a watch subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchMask {
    create: bool,
    moved_in: bool,
    close_write: bool,
    close_nowrite: bool,
}

impl WatchMask {
    /// New entries and closed files: candidate discovery in a staging root.
    pub const CREATE_OR_CLOSE: Self = Self {
        create: true,
        moved_in: true,
        close_write: true,
        close_nowrite: true,
    };

    /// Files closed after writing: commit detection in a staging folder.
    pub const CLOSE_WRITE: Self = Self {
        create: false,
        moved_in: false,
        close_write: true,
        close_nowrite: false,
    };

    /// Whether events of `kind` pass this mask.
    pub fn matches(&self, kind: WatchEventKind) -> bool {
        match kind {
            WatchEventKind::Create => self.create,
            WatchEventKind::MovedIn => self.moved_in,
            WatchEventKind::CloseWrite => self.close_write,
            WatchEventKind::CloseNoWrite => self.close_nowrite,
        }
    }
}

/// An event on a direct child of a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Kind of event
    pub kind: WatchEventKind,
    /// Name of the child, empty when the event concerns the directory itself
    pub name: String,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Stream of events for one watched directory.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
    _guard: Option<Box<dyn Send>>,
}

impl WatchStream {
    /// Wrap a receiver, keeping `guard` alive for as long as the stream.
    pub fn new(rx: mpsc::Receiver<WatchEvent>, guard: Option<Box<dyn Send>>) -> Self {
        Self { rx, _guard: guard }
    }

    /// Receive the next event; `None` once the watch is invalidated.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// Source of directory watches.
pub trait WatchSource: Send + Sync + 'static {
    /// Start watching the direct children of `dir`.
    fn watch(&self, dir: &Path, mask: WatchMask) -> Result<WatchStream, IndexerError>;
}

/// Filesystem-notification backed watch source.
#[derive(Debug, Clone, Default)]
pub struct NotifyWatchSource {
    buffer: usize,
}

impl NotifyWatchSource {
    pub fn new() -> Self {
        Self { buffer: 1000 }
    }
}

impl WatchSource for NotifyWatchSource {
    fn watch(&self, dir: &Path, mask: WatchMask) -> Result<WatchStream, IndexerError> {
        let dir = dir
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(dir.to_path_buf()))?;

        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        let mut tx = Some(tx);
        let watched = dir.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, path = ?watched, "Watcher error");
                    return;
                }
            };

            if is_self_removal(&watched, &event) {
                debug!(path = ?watched, "Watched directory removed");
                // Dropping the sender ends the stream
                tx = None;
                return;
            }

            let Some(sender) = tx.as_ref() else {
                return;
            };
            for change in convert_event(&watched, &event, mask) {
                if let Err(e) = sender.blocking_send(change) {
                    error!(error = %e, "Failed to send watch event");
                }
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = ?dir, "Started watching");

        let guard: Box<dyn Send> = Box::new(watcher);
        Ok(WatchStream::new(rx, Some(guard)))
    }
}

fn is_self_removal(watched: &Path, event: &Event) -> bool {
    matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|p| p == watched)
}

/// Convert a notify event into events on direct children of `watched`.
fn convert_event(watched: &Path, event: &Event, mask: WatchMask) -> Vec<WatchEvent> {
    let kind = match &event.kind {
        EventKind::Create(_) => WatchEventKind::Create,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::MovedIn,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => WatchEventKind::CloseWrite,
        EventKind::Access(AccessKind::Close(_)) => WatchEventKind::CloseNoWrite,
        _ => return Vec::new(),
    };

    if !mask.matches(kind) {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter_map(|path| child_name(watched, path))
        .map(|name| WatchEvent { kind, name })
        .collect()
}

fn child_name(watched: &Path, path: &Path) -> Option<String> {
    if path == watched {
        return Some(String::new());
    }
    if path.parent()? != watched {
        return None;
    }
    path.file_name()?.to_str().map(str::to_string)
}

/// Watch source driven by hand through [`ChannelWatchSource::emit`] and
/// [`ChannelWatchSource::invalidate`].
#[derive(Default)]
pub struct ChannelWatchSource {
    watches: Mutex<HashMap<PathBuf, (WatchMask, mpsc::Sender<WatchEvent>)>>,
    opened: Mutex<HashMap<PathBuf, usize>>,
}

impl ChannelWatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the watch on `dir`, if it is open and its mask
    /// accepts the kind. Returns whether the event was delivered.
    pub async fn emit(&self, dir: &Path, kind: WatchEventKind, name: &str) -> bool {
        let sender = match self.watches.lock().get(dir) {
            Some((mask, sender)) if mask.matches(kind) => sender.clone(),
            _ => return false,
        };
        sender.send(WatchEvent::new(kind, name)).await.is_ok()
    }

    /// End the stream of the watch on `dir`.
    pub fn invalidate(&self, dir: &Path) -> bool {
        self.watches.lock().remove(dir).is_some()
    }

    /// Whether a watch on `dir` is open and still has a reader.
    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watches
            .lock()
            .get(dir)
            .map_or(false, |(_, sender)| !sender.is_closed())
    }

    /// How many times a watch on `dir` has been opened.
    pub fn open_count(&self, dir: &Path) -> usize {
        self.opened.lock().get(dir).copied().unwrap_or(0)
    }
}

impl WatchSource for ChannelWatchSource {
    fn watch(&self, dir: &Path, mask: WatchMask) -> Result<WatchStream, IndexerError> {
        let (tx, rx) = mpsc::channel(64);
        self.watches.lock().insert(dir.to_path_buf(), (mask, tx));
        *self.opened.lock().entry(dir.to_path_buf()).or_default() += 1;
        Ok(WatchStream::new(rx, None))
    }
}
