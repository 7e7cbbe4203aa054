//! Advisory lock serializing runs against one source directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use retainer_core::RunError;

/// Lock file name inside the archive directory.
pub const LOCK_FILE_NAME: &str = ".retainer.lock";

/// Exclusive lock held for the duration of a run.
///
/// Released when dropped. The file itself stays behind; only the lock on it
/// matters.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock in `dir` without waiting.
    pub fn acquire(dir: &Path) -> Result<Self, RunError> {
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| RunError::Lock {
                path: path.clone(),
                source,
            })?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            let contended = err.kind() == std::io::ErrorKind::WouldBlock
                || err.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return Err(if contended {
                RunError::Locked { path }
            } else {
                RunError::Lock { path, source: err }
            });
        }

        // Holder pid, for operators inspecting a stuck lock
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
