//! Recursive file walker.

use crate::IndexerError;
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::warn;

/// What a discovered entry is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Symbolic link, reported as the link itself
    Symlink,
    /// Socket, FIFO or device node
    Other,
}

/// A discovered non-directory entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the entry
    pub path: PathBuf,
    /// Path relative to the walk root
    pub relative: PathBuf,
    /// Kind of entry
    pub kind: EntryKind,
}

/// Walks every non-directory entry below a root.
///
/// Unlike a source-tree walker nothing is filtered: hidden files and files
/// matched by ignore rules are part of a batch like any other file.
/// Symlinks are not followed but are returned as entries of their own, and
/// special files are returned as [`EntryKind::Other`] for the caller to
/// report.
pub struct Walker {
    root: PathBuf,
}

impl Walker {
    /// Create a new walker for the given root directory.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Walk the directory tree and return all files, sorted by path.
    pub fn walk(&self) -> Result<Vec<FileEntry>, IndexerError> {
        if !self.root.is_dir() {
            return Err(IndexerError::NotFound(self.root.clone()));
        }

        let (tx, rx) = mpsc::channel();

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .build_parallel();

        walker.run(|| {
            let tx = tx.clone();
            let root = self.root.clone();
            Box::new(move |result| {
                match result {
                    Ok(entry) => {
                        let kind = match entry.file_type() {
                            Some(ft) if ft.is_dir() => None,
                            Some(ft) if ft.is_file() => Some(EntryKind::File),
                            Some(ft) if ft.is_symlink() => Some(EntryKind::Symlink),
                            Some(_) => Some(EntryKind::Other),
                            None => None,
                        };
                        if let Some(kind) = kind {
                            let path = entry.path().to_path_buf();
                            if let Ok(relative) = path.strip_prefix(&root) {
                                let _ = tx.send(FileEntry {
                                    relative: relative.to_path_buf(),
                                    path,
                                    kind,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        // One unreadable subtree should not hide the rest
                        warn!(error = %e, "Walk error");
                    }
                }
                WalkState::Continue
            })
        });

        drop(tx);

        let mut entries: Vec<FileEntry> = rx.into_iter().collect();

        // Parallel walk order is arbitrary
        entries.sort_by(|a, b| a.relative.cmp(&b.relative));

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_walker_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let walker = Walker::new(temp_dir.path());

        let entries = walker.walk().unwrap();
        assert_eq!(entries.len(), 0);
    }

    #[test]
    fn test_walker_missing_root() {
        let temp_dir = tempdir().unwrap();
        let walker = Walker::new(&temp_dir.path().join("nope"));

        assert!(matches!(walker.walk(), Err(IndexerError::NotFound(_))));
    }

    #[test]
    fn test_walker_includes_hidden_and_ignored_files() {
        let temp_dir = tempdir().unwrap();

        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        fs::write(temp_dir.path().join(".gitignore"), "build/\n").unwrap();
        fs::create_dir(temp_dir.path().join("build")).unwrap();
        File::create(temp_dir.path().join("build/output.txt")).unwrap();
        File::create(temp_dir.path().join(".hidden.txt")).unwrap();

        let walker = Walker::new(temp_dir.path());
        let entries = walker.walk().unwrap();

        let relative: Vec<_> = entries.iter().map(|e| e.relative.clone()).collect();
        assert!(relative.contains(&PathBuf::from("build/output.txt")));
        assert!(relative.contains(&PathBuf::from(".hidden.txt")));
        assert!(relative.contains(&PathBuf::from(".gitignore")));
    }

    #[test]
    fn test_walker_handles_nested_directories() {
        let temp_dir = tempdir().unwrap();

        fs::create_dir_all(temp_dir.path().join("a/b/c")).unwrap();
        File::create(temp_dir.path().join("a/file1.txt")).unwrap();
        File::create(temp_dir.path().join("a/b/file2.txt")).unwrap();
        File::create(temp_dir.path().join("a/b/c/file3.txt")).unwrap();

        let walker = Walker::new(temp_dir.path());
        let entries = walker.walk().unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].relative, PathBuf::from("a/file1.txt"));
        assert!(entries.iter().all(|e| e.path.starts_with(temp_dir.path())));
    }

    #[cfg(unix)]
    #[test]
    fn test_walker_reports_links_and_special_files() {
        let temp_dir = tempdir().unwrap();

        fs::write(temp_dir.path().join("target.txt"), "t").unwrap();
        std::os::unix::fs::symlink("target.txt", temp_dir.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink("missing", temp_dir.path().join("dangling")).unwrap();
        let _socket =
            std::os::unix::net::UnixListener::bind(temp_dir.path().join("sock")).unwrap();

        let walker = Walker::new(temp_dir.path());
        let entries = walker.walk().unwrap();

        let kinds: Vec<_> = entries
            .iter()
            .map(|e| (e.relative.to_str().unwrap(), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("dangling", EntryKind::Symlink),
                ("link.txt", EntryKind::Symlink),
                ("sock", EntryKind::Other),
                ("target.txt", EntryKind::File),
            ]
        );
    }

    #[test]
    fn test_walker_results_are_sorted() {
        let temp_dir = tempdir().unwrap();

        File::create(temp_dir.path().join("c.txt")).unwrap();
        File::create(temp_dir.path().join("a.txt")).unwrap();
        File::create(temp_dir.path().join("b.txt")).unwrap();

        let walker = Walker::new(temp_dir.path());
        let entries = walker.walk().unwrap();

        let names: Vec<_> = entries
            .iter()
            .map(|e| e.relative.to_str().unwrap())
            .collect();

        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }
}
