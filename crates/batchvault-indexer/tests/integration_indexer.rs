//! Integration tests for batchvault ingestion, rebuild and persistence.

use std::fs;
use std::path::Path;
use tempfile::tempdir;

use batchvault_indexer::{Indexer, IndexerError, SnapshotStore, COMMIT_MARKER};

/// Helper to fill a staging folder with a small nested batch
fn stage_batch(folder: &Path, commit_message: &str) -> Vec<&'static str> {
    let files = [
        "readme.txt",
        "data/part-0.csv",
        "data/part-1.csv",
        "data/raw/blob.bin",
        "names__with__delimiters.txt",
        ".hidden",
    ];
    for file in files {
        let path = folder.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("{file} @ {commit_message}")).unwrap();
    }
    fs::write(folder.join(COMMIT_MARKER), commit_message).unwrap();
    files.to_vec()
}

/// Every staged file lands in storage and the index, marker included
#[test]
fn test_ingest_indexes_every_file() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();
    fs::create_dir_all(&storage).unwrap();

    let files = stage_batch(&staging, "A Commit message");

    let mut indexer = Indexer::new(&storage);
    let report = indexer.ingest(&staging).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.committed.len(), files.len() + 1);

    for file in files {
        let entry = indexer.get(file, None).unwrap();
        assert!(indexer.resolve(entry).exists(), "{file} should be stored");
        assert_eq!(entry.commit, 1);
    }
    assert_eq!(indexer.history(COMMIT_MARKER).unwrap().len(), 1);
}

/// Rebuilding over an ingest-populated root gives back the same index
#[test]
fn test_rebuild_equals_incremental_index() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();
    fs::create_dir_all(&storage).unwrap();

    let mut indexer = Indexer::new(&storage);

    stage_batch(&staging, "A Commit message");
    indexer.ingest(&staging).unwrap();

    fs::write(staging.join(COMMIT_MARKER), "A new Commit message").unwrap();
    fs::write(staging.join("data/part-1.csv"), "rewritten").unwrap();
    indexer.ingest(&staging).unwrap();

    assert_eq!(indexer.history(COMMIT_MARKER).unwrap().len(), 2);
    assert_eq!(indexer.history("data/part-1.csv").unwrap().len(), 2);
    assert_eq!(indexer.history("data/part-0.csv").unwrap().len(), 1);

    let rebuilt = Indexer::rebuilt(&storage).unwrap();
    assert_eq!(rebuilt.index(), indexer.index());

    let restored = Indexer::deserialize(&indexer.serialize().unwrap(), &storage).unwrap();
    assert_eq!(restored.index(), indexer.index());
}

/// Three commits of the same marker: lookups by default and by version
#[test]
fn test_get_semantics() {
    let temp_dir = tempdir().unwrap();
    let storage = temp_dir.path().join("storage");
    let input = temp_dir.path().join("input");
    fs::create_dir_all(&storage).unwrap();
    fs::create_dir_all(&input).unwrap();

    let mut indexer = Indexer::new(&storage);
    for c in 1..=3 {
        fs::write(input.join(COMMIT_MARKER), format!("Commit {c}")).unwrap();
        indexer.ingest(&input).unwrap();
    }

    assert_eq!(indexer.get(COMMIT_MARKER, None).unwrap().version, 3);
    assert_eq!(indexer.get(COMMIT_MARKER, Some(1)).unwrap().version, 1);
    assert!(matches!(
        indexer.get(COMMIT_MARKER, Some(4)),
        Err(IndexerError::NoSuchVersion { .. })
    ));

    let second = indexer.get(COMMIT_MARKER, Some(2)).unwrap();
    assert_eq!(fs::read_to_string(indexer.resolve(second)).unwrap(), "Commit 2");
}

/// Ingesting without a marker changes nothing
#[test]
fn test_commit_required() {
    let temp_dir = tempdir().unwrap();
    let storage = temp_dir.path().join("storage");
    let input = temp_dir.path().join("input");
    fs::create_dir_all(&storage).unwrap();
    fs::create_dir_all(input.join("nested")).unwrap();
    fs::write(input.join("nested/file.txt"), "payload").unwrap();

    let mut indexer = Indexer::new(&storage);
    let result = indexer.ingest(&input);

    assert!(matches!(result, Err(IndexerError::MissingCommitMarker(_))));
    assert!(indexer.index().is_empty());
    assert!(input.join("nested/file.txt").exists());
    assert_eq!(fs::read_dir(&storage).unwrap().count(), 0);
}

/// A marker that is a directory does not count as a commit
#[test]
fn test_commit_marker_must_be_a_file() {
    let temp_dir = tempdir().unwrap();
    fs::create_dir_all(temp_dir.path().join("input").join(COMMIT_MARKER)).unwrap();

    let mut indexer = Indexer::new(temp_dir.path().join("storage"));
    let result = indexer.ingest(&temp_dir.path().join("input"));

    assert!(matches!(result, Err(IndexerError::MissingCommitMarker(_))));
}

/// Unparsable filenames are skipped during rebuild
#[test]
fn test_handling_garbage() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("xxx"), "").unwrap();
    fs::write(temp_dir.path().join("1__1__COMMIT"), "").unwrap();
    fs::write(temp_dir.path().join("2__2__COMMIT"), "").unwrap();

    let mut indexer = Indexer::new(temp_dir.path());
    indexer.rebuild_from_storage().unwrap();

    assert_eq!(indexer.index().len(), 1);
    let history = indexer.history(COMMIT_MARKER).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[1].version, 2);

    // The garbage file is left in place
    assert!(temp_dir.path().join("xxx").exists());
}

/// Rebuild discards whatever the index held before
#[test]
fn test_rebuild_discards_previous_index() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("1__1__COMMIT"), "").unwrap();

    let mut indexer = Indexer::new(temp_dir.path());
    indexer
        .with_entry("ghost", 1, None, |_| Ok(()))
        .unwrap();
    indexer.rebuild_from_storage().unwrap();

    assert!(matches!(
        indexer.get("ghost", None),
        Err(IndexerError::NoSuchName(_))
    ));
    assert!(indexer.get(COMMIT_MARKER, None).is_ok());
}

/// Persisted snapshots survive a reload and are ignored by rebuild
#[tokio::test]
async fn test_snapshot_roundtrip_through_store() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();
    fs::create_dir_all(&storage).unwrap();

    let store = SnapshotStore::new(&storage);
    let mut indexer = Indexer::new(&storage);
    stage_batch(&staging, "first");
    indexer.ingest(&staging).unwrap();
    store.persist(&indexer).await.unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded.index(), indexer.index());

    let rebuilt = Indexer::rebuilt(&storage).unwrap();
    assert_eq!(rebuilt.index(), indexer.index());
}

/// A file that cannot be moved stays in staging; the rest of the batch lands
#[test]
fn test_partial_batch_leaves_failed_file_in_staging() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();
    // Occupy the storage path b.txt will be moved to
    fs::create_dir_all(storage.join("1__1__b.txt/occupied")).unwrap();

    fs::write(staging.join("a.txt"), "a").unwrap();
    fs::write(staging.join("b.txt"), "b").unwrap();
    fs::write(staging.join(COMMIT_MARKER), "partial").unwrap();

    let mut indexer = Indexer::new(&storage);
    let report = indexer.ingest(&staging).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.committed, vec![COMMIT_MARKER.to_string(), "a.txt".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, staging.join("b.txt"));

    assert_eq!(fs::read_to_string(staging.join("b.txt")).unwrap(), "b");
    assert!(!indexer.index().contains("b.txt"));
    assert!(storage.join("1__1__b.txt/occupied").is_dir());
    assert!(indexer.get("a.txt", None).is_ok());
    assert!(indexer.get(COMMIT_MARKER, None).is_ok());
}

/// A name already at the maximum version cannot take another one
#[test]
fn test_version_overflow_after_rebuild() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();
    fs::create_dir_all(&storage).unwrap();
    fs::write(storage.join(format!("{}__1__x", i64::MAX)), "old").unwrap();

    let mut indexer = Indexer::rebuilt(&storage).unwrap();
    fs::write(staging.join("x"), "new").unwrap();
    fs::write(staging.join(COMMIT_MARKER), "overflow").unwrap();

    let report = indexer.ingest(&staging).unwrap();

    assert_eq!(report.committed, vec![COMMIT_MARKER.to_string()]);
    assert!(matches!(
        &report.failed[..],
        [(path, IndexerError::VersionOverflow(name))] if path == &staging.join("x") && name == "x"
    ));
    assert_eq!(fs::read_to_string(staging.join("x")).unwrap(), "new");

    let history = indexer.history("x").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, i64::MAX);
    assert_eq!(fs::read_to_string(indexer.resolve(&history[0])).unwrap(), "old");
}

/// Symlinks are stored as links; sockets are reported and left in staging
#[cfg(unix)]
#[test]
fn test_ingest_links_and_special_files() {
    let temp_dir = tempdir().unwrap();
    let staging = temp_dir.path().join("staging");
    let storage = temp_dir.path().join("storage");
    fs::create_dir_all(&staging).unwrap();

    std::os::unix::fs::symlink("/etc/hostname", staging.join("link")).unwrap();
    let _socket = std::os::unix::net::UnixListener::bind(staging.join("sock")).unwrap();
    fs::write(staging.join(COMMIT_MARKER), "links").unwrap();

    let mut indexer = Indexer::new(&storage);
    let report = indexer.ingest(&staging).unwrap();

    let entry = indexer.get("link", None).unwrap();
    let stored = indexer.resolve(entry);
    assert!(fs::symlink_metadata(&stored).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&stored).unwrap(), Path::new("/etc/hostname"));

    assert!(matches!(
        &report.failed[..],
        [(path, IndexerError::UnsupportedFileType(_))] if path == &staging.join("sock")
    ));
    assert!(staging.join("sock").exists());
    assert!(!indexer.index().contains("sock"));

    // Rebuild sees the stored link like any other artifact
    let rebuilt = Indexer::rebuilt(&storage).unwrap();
    assert_eq!(rebuilt.index(), indexer.index());
}
