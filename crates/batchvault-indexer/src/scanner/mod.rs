//! File system scanning for staging folders and the storage root.

mod walker;

pub use walker::{EntryKind, FileEntry, Walker};
