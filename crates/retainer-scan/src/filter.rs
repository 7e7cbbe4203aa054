//! JWalk-based age filter.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use derive_builder::Builder;
use globset::{Glob, GlobMatcher};
use jwalk::{Parallelism, WalkDir};

use retainer_core::{FileCandidate, ScanError, ScanWarning, WarningKind, SECS_PER_DAY};

/// Selects regular files older than a retention window.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct AgeFilter {
    /// Directory to enumerate.
    pub root: PathBuf,

    /// Maximum depth below `root` (1 = direct children only).
    #[builder(default = "1")]
    pub max_depth: u32,

    /// Files must be strictly older than this many days.
    #[builder(default = "0")]
    pub min_age_days: u32,

    /// Instant ages are measured from (default: now).
    #[builder(default = "SystemTime::now()")]
    pub reference_time: SystemTime,

    /// Glob the file name must match (e.g. `*.tar.gz`).
    #[builder(default, setter(into, strip_option))]
    pub name_pattern: Option<String>,

    /// Subtrees that are never returned.
    #[builder(default)]
    pub excluded: Vec<PathBuf>,
}

impl AgeFilterBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.root {
            Some(root) if root.as_os_str().is_empty() => {
                Err("Root path cannot be empty".to_string())
            }
            Some(_) => Ok(()),
            None => Err("Root path is required".to_string()),
        }
    }
}

/// Files selected by an [`AgeFilter`].
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Matching files, sorted by path.
    pub candidates: Vec<FileCandidate>,
    /// Problems below the root that did not stop the scan.
    pub warnings: Vec<ScanWarning>,
    /// Regular files inspected, matching or not.
    pub files_seen: usize,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Total size of all candidates.
    pub fn total_size(&self) -> u64 {
        self.candidates.iter().map(|c| c.size).sum()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.candidates.iter().map(|c| c.path.clone()).collect()
    }
}

impl AgeFilter {
    /// Create a new filter builder.
    pub fn builder() -> AgeFilterBuilder {
        AgeFilterBuilder::default()
    }

    /// Filter direct children of `root` older than `min_age_days`.
    pub fn new(root: impl Into<PathBuf>, min_age_days: u32) -> Self {
        Self {
            root: root.into(),
            max_depth: 1,
            min_age_days,
            reference_time: SystemTime::now(),
            name_pattern: None,
            excluded: Vec::new(),
        }
    }

    /// Age threshold as a duration.
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(u64::from(self.min_age_days) * SECS_PER_DAY)
    }

    /// Whether a file modified at `modified` is past the threshold.
    pub fn is_expired(&self, modified: SystemTime) -> bool {
        self.reference_time
            .duration_since(modified)
            .map(|age| age > self.threshold())
            .unwrap_or(false)
    }

    /// Enumerate matching files.
    ///
    /// Fails only when the root itself cannot be read; anything deeper becomes
    /// a warning in the report.
    pub fn scan(&self) -> Result<ScanReport, ScanError> {
        let root = self.root.as_path();
        let metadata = std::fs::metadata(root).map_err(|e| ScanError::io(root, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        // jwalk reports an unreadable root as an ordinary entry error
        std::fs::read_dir(root).map_err(|e| ScanError::io(root, e))?;

        let matcher = self.compile_pattern()?;
        let mut report = ScanReport::default();

        let walker = WalkDir::new(root)
            .parallelism(Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            })
            .skip_hidden(false)
            .follow_links(false)
            .sort(true)
            .min_depth(1)
            .max_depth(self.max_depth.max(1) as usize);

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    let kind = match err.io_error().map(std::io::Error::kind) {
                        Some(std::io::ErrorKind::PermissionDenied) => {
                            WarningKind::PermissionDenied
                        }
                        _ => WarningKind::ReadError,
                    };
                    tracing::warn!(path = %path.display(), "skipping unreadable entry: {err}");
                    report
                        .warnings
                        .push(ScanWarning::new(path, err.to_string(), kind));
                    continue;
                }
            };

            let path = entry.path();
            if self.excluded.iter().any(|ex| path.starts_with(ex)) {
                continue;
            }

            // Symlinks and special files are never archived
            if !entry.file_type().is_file() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    report.warnings.push(ScanWarning::new(
                        &path,
                        err.to_string(),
                        WarningKind::MetadataError,
                    ));
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(err) => {
                    report.warnings.push(ScanWarning::new(
                        &path,
                        err.to_string(),
                        WarningKind::MetadataError,
                    ));
                    continue;
                }
            };

            report.files_seen += 1;

            if let Some(matcher) = &matcher {
                if !matcher.is_match(entry.file_name()) {
                    continue;
                }
            }

            if self.is_expired(modified) {
                report
                    .candidates
                    .push(FileCandidate::new(path, modified, metadata.len()));
            }
        }

        report.candidates.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::debug!(
            root = %root.display(),
            candidates = report.candidates.len(),
            seen = report.files_seen,
            "age filter finished"
        );

        Ok(report)
    }

    fn compile_pattern(&self) -> Result<Option<GlobMatcher>, ScanError> {
        self.name_pattern
            .as_deref()
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| ScanError::InvalidPattern {
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })
            })
            .transpose()
    }
}

/// Regular files at most `max_depth` below `root` strictly older than
/// `min_age_days`, measured from now.
pub fn find_older_than(
    root: &Path,
    max_depth: u32,
    min_age_days: u32,
) -> Result<ScanReport, ScanError> {
    AgeFilter {
        max_depth,
        ..AgeFilter::new(root, min_age_days)
    }
    .scan()
}
