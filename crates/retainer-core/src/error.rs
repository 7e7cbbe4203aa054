//! Error taxonomy for archiving runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required setting is missing or unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No source directory was configured.
    #[error("Source directory is not set")]
    MissingSourceDirectory,

    /// The configured source directory does not exist.
    #[error("Source directory does not exist: {path}")]
    SourceNotFound { path: PathBuf },

    /// The configured source path is not a directory.
    #[error("Source path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The archive name prefix cannot be used in a file name.
    #[error("Invalid archive name prefix: {prefix:?}")]
    InvalidPrefix { prefix: String },

    /// A bundle directory or run log name that does not stay inside the
    /// source directory as a single path component.
    #[error("Invalid {field} {value:?}: expected a plain file name")]
    InvalidName { field: &'static str, value: String },

    /// The archive extension does not map to a supported format.
    #[error("Unsupported archive extension: {extension:?}")]
    UnsupportedExtension { extension: String },

    /// A config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file could not be parsed.
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors that prevent enumeration from starting.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Name filter could not be compiled.
    #[error("Invalid name pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error reading a directory entry.
    ReadError,
    /// Error reading metadata.
    MetadataError,
}

/// Non-fatal problem encountered while enumerating files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors raised while writing a bundle.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The destination directory could not be created.
    #[error("Failed to create archive directory {path}: {source}")]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The staging file could not be created.
    #[error("Failed to create staging file in {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file could not be added to the bundle.
    #[error("Failed to add {path} to archive: {source}")]
    Entry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Finishing the compressed stream failed.
    #[error("Failed to write archive {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The staged bundle could not be moved into place.
    #[error("Failed to finalize archive {path}: {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The extension does not name a supported format.
    #[error("Unsupported archive extension: {extension:?}")]
    UnsupportedFormat { extension: String },
}

/// A single file that could not be deleted.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{}: {message}", path.display())]
pub struct PruneError {
    /// The path that could not be removed.
    pub path: PathBuf,
    /// Raw diagnostic text.
    pub message: String,
}

impl PruneError {
    /// Create a new prune error.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A notification could not be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// No mail transport is installed.
    #[error("No mail transport found (tried {tried})")]
    TransportUnavailable { tried: String },

    /// The transport process could not be started or fed.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Rejected {
        program: String,
        status: String,
        stderr: String,
    },
}

/// The recurring-task scheduler could not be updated.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The scheduler service or binary is unavailable.
    #[error("Scheduler unavailable: {message}")]
    Unavailable { message: String },

    /// The cron expression is malformed.
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The marker cannot be embedded in a command line.
    #[error("Invalid schedule marker {marker:?}")]
    InvalidMarker { marker: String },

    /// The invocation command could not be built.
    #[error("Cannot build invocation command: {message}")]
    Command { message: String },

    /// Reading or writing a schedule table failed.
    #[error("Schedule I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors that end a run with a failure outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Another run holds the lock for this source directory.
    #[error("Another run is in progress (lock held on {path})")]
    Locked { path: PathBuf },

    /// The lock file could not be opened.
    #[error("Failed to open lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
