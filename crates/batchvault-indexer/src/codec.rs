//! Storage filename codec.
//!
//! A stored artifact lives at `{parent}/{version}__{commit}__{name}` under the
//! storage root, where `{parent}/{name}` is its logical name.

use crate::IndexerError;
use std::path::{Component, Path};

/// Separator between the version, commit and name fields.
pub const DELIMITER: &str = "__";

/// A logical name paired with the version and commit it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Logical name, `/` separated
    pub path: String,
    /// Version of the artifact
    pub version: i64,
    /// Commit id of the batch the artifact arrived in
    pub commit: i64,
}

impl VersionRecord {
    pub fn new(path: impl Into<String>, version: i64, commit: i64) -> Self {
        Self {
            path: path.into(),
            version,
            commit,
        }
    }
}

/// Encode a record into its storage filename (relative to the storage root).
pub fn encode(record: &VersionRecord) -> String {
    let (parent, name) = split_parent(&record.path);
    let file = format!(
        "{}{DELIMITER}{}{DELIMITER}{}",
        record.version, record.commit, name
    );
    match parent {
        Some(parent) => format!("{parent}/{file}"),
        None => file,
    }
}

/// Decode a storage filename (relative to the storage root) into a record.
///
/// Only the first two delimiters are significant, so the trailing name may
/// itself contain `__`.
pub fn decode(filename: &str) -> Result<VersionRecord, IndexerError> {
    let malformed = || IndexerError::MalformedName(filename.to_string());

    let (parent, file) = split_parent(filename);
    let mut parts = file.splitn(3, DELIMITER);
    let (Some(version), Some(commit), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    if name.is_empty() {
        return Err(malformed());
    }

    let version = version.parse::<i64>().map_err(|_| malformed())?;
    let commit = commit.parse::<i64>().map_err(|_| malformed())?;
    let path = match parent {
        Some(parent) => format!("{parent}/{name}"),
        None => name.to_string(),
    };

    Ok(VersionRecord {
        path,
        version,
        commit,
    })
}

/// Render a relative filesystem path as a `/` separated logical name.
///
/// `.` components are dropped. Returns `None` for paths that escape their
/// base (`..`), are absolute, or are not valid UTF-8.
pub fn logical_name(relative: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn split_parent(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    }
}
