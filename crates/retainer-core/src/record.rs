//! Values produced by a run: candidates, bundles and run records.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum::Display;

/// A file selected for archiving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCandidate {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// Last modification time.
    pub last_modified: SystemTime,
    /// Size in bytes.
    pub size: u64,
}

impl FileCandidate {
    pub fn new(path: impl Into<PathBuf>, last_modified: SystemTime, size: u64) -> Self {
        Self {
            path: path.into(),
            last_modified,
            size,
        }
    }
}

/// A finalized bundle on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveBundle {
    /// Final path of the bundle.
    pub path: PathBuf,
    /// When the bundle was created.
    pub created_at: DateTime<Local>,
    /// Number of files stored in the bundle.
    pub source_file_count: usize,
    /// Size of the bundle on disk.
    pub size_bytes: u64,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunOutcome {
    /// Everything requested completed (including "nothing to archive").
    Success,
    /// The bundle was written but some originals could not be removed.
    Partial,
    /// The run could not archive.
    Failure,
}

impl RunOutcome {
    /// Process exit status for a non-interactive run.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success | Self::Partial => 0,
            Self::Failure => 1,
        }
    }

    /// Whether the failure wording should be used for reports.
    pub fn is_degraded(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Local>,
    pub outcome: RunOutcome,
    pub archive_path: Option<PathBuf>,
    pub files_archived: usize,
    pub files_deleted: usize,
    pub backups_deleted: usize,
    /// Non-fatal problems (unreadable subdirectories, failed bundle pruning, ...).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Cause of a failure or partial outcome.
    pub error_detail: Option<String>,
}

impl RunRecord {
    /// Start an empty record stamped now.
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            timestamp: Local::now(),
            outcome,
            archive_path: None,
            files_archived: 0,
            files_deleted: 0,
            backups_deleted: 0,
            warnings: Vec::new(),
            error_detail: None,
        }
    }

    /// Render the record as a single human-readable log line (no newline).
    pub fn to_log_line(&self) -> String {
        let archive = self
            .archive_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        let mut line = format!(
            "{} | {} | archived={} deleted={} backups_deleted={} | archive={} | warnings={}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S %z"),
            self.outcome,
            self.files_archived,
            self.files_deleted,
            self.backups_deleted,
            archive,
            self.warnings.len(),
        );
        if !self.warnings.is_empty() {
            line.push_str(" (");
            line.push_str(&single_line(&self.warnings.join("; ")));
            line.push(')');
        }
        if let Some(detail) = &self.error_detail {
            line.push_str(" | error=");
            line.push_str(&single_line(detail));
        }
        line
    }
}

fn single_line(text: &str) -> String {
    text.split(['\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" / ")
}

/// The crontab line managed by retainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub cron_expression: String,
    pub invocation_command: String,
    /// Identifier carried as `--marker <id>` inside the command.
    pub marker: String,
}

impl ScheduleEntry {
    /// The crontab line for this entry.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.cron_expression, self.invocation_command)
    }
}
