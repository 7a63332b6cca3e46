use std::path::Path;

use crate::EntryKind;

/// A trait that can be implemented to be notified of the progress of writing or extracting an
/// archive.
///
/// A reporter is injected into [`crate::write::Archiver`] or [`crate::read::Extractor`] with
/// `with_reporter`. All methods have empty default implementations.
pub trait Reporter: Send + Sync {
    /// Called after an entry has been appended to an archive.
    fn on_entry_written(&self, _name: &str, _kind: EntryKind, _size: u64) {}

    /// Called after an entry has been recreated on disk.
    fn on_entry_extracted(&self, _path: &Path, _kind: EntryKind, _size: u64) {}

    /// Called when an entry of an unsupported type is skipped during extraction.
    fn on_entry_skipped(&self, _name: &str, _entry_type: tar::EntryType) {}

    /// Called once all entries have been processed.
    fn on_complete(&self, _entries: usize) {}
}
