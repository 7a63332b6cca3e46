use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use stash_archive::{EntryKind, Reporter};

use crate::global_multi_progress;

/// Shows a spinner with the number of processed entries and the entry that was processed last.
pub struct ProgressReporter {
    progress_bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(prefix: &'static str) -> Self {
        let progress_bar = global_multi_progress().add(ProgressBar::new_spinner());
        progress_bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix} {pos} entries {wide_msg:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress_bar.set_prefix(prefix);
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        Self { progress_bar }
    }
}

impl Reporter for ProgressReporter {
    fn on_entry_written(&self, name: &str, _kind: EntryKind, _size: u64) {
        self.progress_bar.inc(1);
        self.progress_bar.set_message(name.to_owned());
    }

    fn on_entry_extracted(&self, path: &Path, _kind: EntryKind, _size: u64) {
        self.progress_bar.inc(1);
        self.progress_bar.set_message(path.display().to_string());
    }

    fn on_complete(&self, _entries: usize) {
        self.progress_bar.finish_and_clear();
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // Clear the spinner if the operation failed before completing.
        if !self.progress_bar.is_finished() {
            self.progress_bar.finish_and_clear();
        }
    }
}
