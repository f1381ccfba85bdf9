//! Extended-metrics flag files
//!
//! Collection is toggled from outside the process by creating zero-byte
//! sentinel files. Only existence matters; contents are never read.

use std::path::{Path, PathBuf};

/// Watches the start/end flag-file pair
#[derive(Debug, Clone)]
pub struct FlagWatcher {
    start: PathBuf,
    end: PathBuf,
}

impl FlagWatcher {
    pub fn new(start: impl Into<PathBuf>, end: impl Into<PathBuf>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn start_path(&self) -> &Path {
        &self.start
    }

    pub fn end_path(&self) -> &Path {
        &self.end
    }

    /// Extended metrics are on while the start flag exists and the end flag
    /// does not.
    pub fn poll(&self) -> bool {
        extended_metrics_enabled(self.start.exists(), self.end.exists())
    }
}

fn extended_metrics_enabled(start_exists: bool, end_exists: bool) -> bool {
    start_exists && !end_exists
}
