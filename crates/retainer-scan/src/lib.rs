//! Age-based file enumeration for retainer.
//!
//! This crate finds regular files that have outlived a retention window,
//! using jwalk for traversal.
//!
//! # Example
//!
//! ```rust,no_run
//! use retainer_scan::find_older_than;
//!
//! let report = find_older_than("/var/log/myapp".as_ref(), 1, 7).unwrap();
//!
//! for candidate in &report.candidates {
//!     println!("{}", candidate.path.display());
//! }
//! for warning in &report.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! ```
//!
//! Ages are strict: with a window of 7 days a file modified exactly seven
//! days ago is kept, one modified a second earlier is selected.

mod filter;

pub use filter::{AgeFilter, AgeFilterBuilder, ScanReport, find_older_than};

// Re-export core types for convenience
pub use retainer_core::{FileCandidate, ScanError, ScanWarning, WarningKind};
