//! Append-only, human-readable run log.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use retainer_core::RunRecord;

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("Failed to append to run log {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read run log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One line per run, never rewritten.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` as a single line.
    ///
    /// The file is opened in append mode and locked exclusively, and the line
    /// goes out in one write, so concurrent writers never interleave.
    pub fn append(&self, record: &RunRecord) -> Result<(), RunLogError> {
        let err = |source| RunLogError::Append {
            path: self.path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(err)?;

        FileExt::lock_exclusive(&file).map_err(err)?;
        let mut line = record.to_log_line();
        line.push('\n');
        let written = (&file).write_all(line.as_bytes());
        let _ = FileExt::unlock(&file);
        written.map_err(err)?;

        tracing::debug!(path = %self.path.display(), "run recorded");
        Ok(())
    }

    /// The last `limit` lines, oldest first.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<String>, RunLogError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RunLogError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(limit);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }
}
