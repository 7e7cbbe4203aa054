//! Best-effort deletion of expired files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use retainer_core::{PruneError, ScanError, ScanWarning};
use retainer_scan::AgeFilter;

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    /// Files that were removed.
    pub deleted: Vec<PathBuf>,
    /// Files that could not be removed.
    pub errors: Vec<PruneError>,
    /// Problems encountered while looking for expired files.
    pub warnings: Vec<ScanWarning>,
}

impl PruneReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// True when every attempted deletion succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!("Deleted {} files", self.deleted.len())
        } else {
            format!(
                "Deleted {} files, {} failed",
                self.deleted.len(),
                self.errors.len()
            )
        }
    }
}

/// Deletes files one at a time, collecting failures instead of stopping.
#[derive(Debug, Clone, Default)]
pub struct Pruner {
    reference_time: Option<SystemTime>,
    protected: Vec<PathBuf>,
}

impl Pruner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure ages from `time` instead of now.
    pub fn with_reference_time(mut self, time: SystemTime) -> Self {
        self.reference_time = Some(time);
        self
    }

    /// Never delete `path`, even if it matches.
    pub fn protect(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    /// Delete exactly the given files.
    ///
    /// A file that is already gone counts as neither deleted nor failed.
    pub fn delete_paths<I>(&self, paths: I) -> PruneReport
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut report = PruneReport::default();

        for path in paths {
            if self.is_protected(&path) {
                tracing::debug!(path = %path.display(), "skipping protected file");
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "deleted");
                    report.deleted.push(path);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "already gone");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "failed to delete: {err}");
                    report.errors.push(PruneError::new(path, err.to_string()));
                }
            }
        }

        report
    }

    /// Delete regular files under `root` strictly older than `min_age_days`,
    /// optionally limited to names matching `name_pattern`.
    pub fn delete_older_than(
        &self,
        root: &Path,
        max_depth: u32,
        min_age_days: u32,
        name_pattern: Option<&str>,
    ) -> Result<PruneReport, ScanError> {
        let mut filter = AgeFilter {
            max_depth,
            name_pattern: name_pattern.map(str::to_string),
            ..AgeFilter::new(root, min_age_days)
        };
        if let Some(time) = self.reference_time {
            filter.reference_time = time;
        }

        let scan = match filter.scan() {
            Ok(scan) => scan,
            Err(ScanError::NotFound { .. }) => {
                tracing::debug!(root = %root.display(), "nothing to prune yet");
                return Ok(PruneReport::default());
            }
            Err(err) => return Err(err),
        };
        let mut report = self.delete_paths(scan.candidates.into_iter().map(|c| c.path));
        report.warnings = scan.warnings;

        tracing::info!(root = %root.display(), "{}", report.summary());
        Ok(report)
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|p| p == path)
    }
}
