//! Version index: logical name to ascending version history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One committed artifact under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Version of the artifact within its logical name
    pub version: i64,
    /// Commit id of the batch it arrived in
    pub commit: i64,
    /// Storage filename relative to the storage root
    pub url: String,
}

/// Ordered version history for every logical name.
///
/// Each history is kept ascending by version; the last element is the
/// current version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: BTreeMap<String, Vec<Entry>>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Version the next entry for `name` should take, `None` once the
    /// current version is `i64::MAX`.
    pub fn next_version(&self, name: &str) -> Option<i64> {
        self.entries
            .get(name)
            .and_then(|history| history.last())
            .map_or(Some(1), |entry| entry.version.checked_add(1))
    }

    /// Insert an entry, keeping the history of `name` ascending.
    ///
    /// Scanning from the newest entry backward, the new entry lands right
    /// after the first entry with a strictly lower version, or at the front.
    /// An equal version therefore goes before the existing ones.
    pub fn insert(&mut self, name: &str, entry: Entry) {
        let history = self.entries.entry(name.to_string()).or_default();
        let position = history
            .iter()
            .rposition(|existing| existing.version < entry.version)
            .map_or(0, |i| i + 1);
        history.insert(position, entry);
    }

    /// Full history for a name, oldest first.
    pub fn history(&self, name: &str) -> Option<&[Entry]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Current (highest) entry for a name.
    pub fn latest(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name).and_then(|history| history.last())
    }

    /// Whether a name has any entries.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All indexed names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over every name and its history.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Entry])> {
        self.entries
            .iter()
            .map(|(name, history)| (name.as_str(), history.as_slice()))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries across all names.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
