//! File operations for retainer.
//!
//! This crate performs the side effects of a run:
//!
//! - [`ArchiveWriter`] bundles candidate files into a new compressed archive,
//!   staging it so a failed write never leaves a partial bundle behind.
//! - [`Pruner`] deletes expired originals and bundles, collecting per-file
//!   failures instead of aborting.
//! - [`RunLock`] keeps two runs from working on the same directory at once.

mod archive;
mod lock;
mod prune;

pub use archive::{ArchiveWriter, BundleOutcome, STAGING_SUFFIX, bundle_file_name, staging_pattern};
pub use lock::{LOCK_FILE_NAME, RunLock};
pub use prune::{PruneReport, Pruner};

pub use retainer_core::{ArchiveBundle, ArchiveError, ArchiveFormat, FileCandidate, PruneError};
