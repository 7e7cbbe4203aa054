//! Bundle writer with staged, all-or-nothing finalization.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tempfile::NamedTempFile;

use retainer_core::{ArchiveBundle, ArchiveError, ArchiveFormat, FileCandidate};

/// Suffix of in-progress bundles inside the destination directory.
pub const STAGING_SUFFIX: &str = ".partial";

/// Attempts at a unique name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Result of a bundle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleOutcome {
    /// A bundle was written and finalized.
    Written(ArchiveBundle),
    /// There were no files; nothing was created.
    NothingToArchive,
}

impl BundleOutcome {
    pub fn bundle(&self) -> Option<&ArchiveBundle> {
        match self {
            Self::Written(bundle) => Some(bundle),
            Self::NothingToArchive => None,
        }
    }
}

/// Streams files into a timestamped bundle.
///
/// Data is written to a staging file inside the destination directory and
/// only renamed to `<prefix>_<YYYYmmdd_HHMMSS>.<extension>` once every entry
/// has been written and synced. Any failure drops the staging file, so no
/// partial bundle is ever visible at a final path.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    destination_dir: PathBuf,
    prefix: String,
    extension: String,
    source_root: Option<PathBuf>,
}

impl ArchiveWriter {
    /// Create a writer for `<destination_dir>/<prefix>_<timestamp>.<extension>`.
    pub fn new(
        destination_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            source_root: None,
        }
    }

    /// Store entries relative to `root` instead of by bare file name.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Write every candidate into one new bundle.
    pub fn write_bundle(&self, files: &[FileCandidate]) -> Result<BundleOutcome, ArchiveError> {
        if files.is_empty() {
            tracing::debug!("nothing to archive");
            return Ok(BundleOutcome::NothingToArchive);
        }

        let format = ArchiveFormat::from_extension(&self.extension).ok_or_else(|| {
            ArchiveError::UnsupportedFormat {
                extension: self.extension.clone(),
            }
        })?;

        fs::create_dir_all(&self.destination_dir).map_err(|source| {
            ArchiveError::CreateDestination {
                path: self.destination_dir.clone(),
                source,
            }
        })?;

        let created_at = Local::now();
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{}_", self.prefix))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.destination_dir)
            .map_err(|source| ArchiveError::Staging {
                path: self.destination_dir.clone(),
                source,
            })?;
        let staging_path = staging.path().to_path_buf();

        tracing::debug!(
            staging = %staging_path.display(),
            files = files.len(),
            %format,
            "writing bundle"
        );

        self.write_entries(format, files, staging.as_file_mut(), &staging_path)?;

        let write_err = |source| ArchiveError::Write {
            path: staging_path.clone(),
            source,
        };
        staging.as_file().sync_all().map_err(write_err)?;
        let size_bytes = staging.as_file().metadata().map_err(write_err)?.len();

        let path = self.finalize(staging, created_at)?;
        tracing::info!(path = %path.display(), files = files.len(), "bundle finalized");

        Ok(BundleOutcome::Written(ArchiveBundle {
            path,
            created_at,
            source_file_count: files.len(),
            size_bytes,
        }))
    }

    fn write_entries(
        &self,
        format: ArchiveFormat,
        files: &[FileCandidate],
        file: &mut File,
        staging_path: &Path,
    ) -> Result<(), ArchiveError> {
        let write_err = |source| ArchiveError::Write {
            path: staging_path.to_path_buf(),
            source,
        };

        match format {
            ArchiveFormat::Tar => {
                self.append_tar(&mut *file, files, staging_path)?;
            }
            ArchiveFormat::TarGz => {
                let encoder = flate2::write::GzEncoder::new(&mut *file, flate2::Compression::default());
                self.append_tar(encoder, files, staging_path)?
                    .finish()
                    .map_err(write_err)?;
            }
            ArchiveFormat::TarXz => {
                let encoder = xz2::write::XzEncoder::new(&mut *file, 6);
                self.append_tar(encoder, files, staging_path)?
                    .finish()
                    .map_err(write_err)?;
            }
            ArchiveFormat::TarBz2 => {
                let encoder =
                    bzip2::write::BzEncoder::new(&mut *file, bzip2::Compression::default());
                self.append_tar(encoder, files, staging_path)?
                    .finish()
                    .map_err(write_err)?;
            }
            ArchiveFormat::Zip => self.append_zip(file, files, staging_path)?,
        }

        file.flush().map_err(write_err)
    }

    fn append_tar<W: Write>(
        &self,
        writer: W,
        files: &[FileCandidate],
        staging_path: &Path,
    ) -> Result<W, ArchiveError> {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);

        for candidate in files {
            let name = self.entry_name(&candidate.path);
            builder
                .append_path_with_name(&candidate.path, &name)
                .map_err(|source| ArchiveError::Entry {
                    path: candidate.path.clone(),
                    source,
                })?;
        }

        builder.into_inner().map_err(|source| ArchiveError::Write {
            path: staging_path.to_path_buf(),
            source,
        })
    }

    fn append_zip(
        &self,
        file: &mut File,
        files: &[FileCandidate],
        staging_path: &Path,
    ) -> Result<(), ArchiveError> {
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for candidate in files {
            let entry_err = |source| ArchiveError::Entry {
                path: candidate.path.clone(),
                source,
            };
            let mut source = File::open(&candidate.path).map_err(entry_err)?;
            let name = self
                .entry_name(&candidate.path)
                .to_string_lossy()
                .replace('\\', "/");
            zip.start_file(name, options)
                .map_err(|e| entry_err(io::Error::other(e)))?;
            io::copy(&mut source, &mut zip).map_err(entry_err)?;
        }

        zip.finish().map_err(|e| ArchiveError::Write {
            path: staging_path.to_path_buf(),
            source: io::Error::other(e),
        })?;
        Ok(())
    }

    /// Name of `path` inside the bundle.
    fn entry_name(&self, path: &Path) -> PathBuf {
        self.source_root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| path.file_name().map(PathBuf::from))
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// Move the staging file to its final name without clobbering anything.
    fn finalize(
        &self,
        mut staging: NamedTempFile,
        created_at: DateTime<Local>,
    ) -> Result<PathBuf, ArchiveError> {
        let stamp = created_at.format("%Y%m%d_%H%M%S").to_string();
        let pid = std::process::id();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let suffix = match attempt {
                0 => None,
                1 => Some(pid.to_string()),
                n => Some(format!("{pid}_{}", n - 1)),
            };
            let target = self.destination_dir.join(bundle_file_name(
                &self.prefix,
                &stamp,
                &self.extension,
                suffix.as_deref(),
            ));

            match staging.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(target = %target.display(), "bundle name taken");
                    staging = err.file;
                }
                Err(err) => {
                    return Err(ArchiveError::Finalize {
                        path: target,
                        source: err.error,
                    });
                }
            }
        }

        Err(ArchiveError::Finalize {
            path: self.destination_dir.clone(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "no free bundle name for this second",
            ),
        })
    }
}

/// Glob matching staging files left behind by an interrupted write.
pub fn staging_pattern(prefix: &str) -> String {
    format!(".{prefix}_*{STAGING_SUFFIX}")
}

/// `<prefix>_<stamp>[_<suffix>].<extension>`
pub fn bundle_file_name(
    prefix: &str,
    stamp: &str,
    extension: &str,
    suffix: Option<&str>,
) -> String {
    match suffix {
        Some(suffix) => format!("{prefix}_{stamp}_{suffix}.{extension}"),
        None => format!("{prefix}_{stamp}.{extension}"),
    }
}
