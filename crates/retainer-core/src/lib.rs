//! Core types and configuration for retainer.
//!
//! This crate provides the data model shared by the scanning, archiving and
//! coordination crates: the retention configuration, the records a run
//! produces, and the error taxonomy.

mod config;
mod error;
mod format;
mod record;

pub use config::{
    ConfigFile, DaysValue, RetentionConfig, RetentionConfigBuilder, default_config_path,
    parse_retention_days, DEFAULT_ARCHIVE_DIR, DEFAULT_ARCHIVE_EXTENSION, DEFAULT_ARCHIVE_PREFIX,
    DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_LOG_RETENTION_DAYS, DEFAULT_RUN_LOG_FILE,
    DEFAULT_SCHEDULE,
};
pub use error::{
    ArchiveError, ConfigError, NotifyError, PruneError, RunError, ScanError, ScanWarning,
    ScheduleError, WarningKind,
};
pub use format::ArchiveFormat;
pub use record::{ArchiveBundle, FileCandidate, RunOutcome, RunRecord, ScheduleEntry};

/// Seconds in one retention day.
pub const SECS_PER_DAY: u64 = 24 * 60 * 60;
