//! Terminal rendering of run results.

use std::io::{self, Write};

use retainer_core::{RetentionConfig, RunOutcome};
use retainer_engine::{RunPlan, RunReport};

/// Format size in human-readable form.
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Print the outcome of a run.
pub fn print_report<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
    let record = &report.record;
    let label = match record.outcome {
        RunOutcome::Success => "success",
        RunOutcome::Partial => "partial (archive written, cleanup incomplete)",
        RunOutcome::Failure => "FAILED",
    };

    writeln!(out)?;
    writeln!(out, "{}", "─".repeat(60))?;
    writeln!(out, " Outcome: {label}")?;
    match &report.bundle {
        Some(bundle) => writeln!(
            out,
            " Archive: {} ({})",
            bundle.path.display(),
            format_size(bundle.size_bytes)
        )?,
        None => writeln!(out, " Archive: none")?,
    }
    writeln!(
        out,
        " {} archived, {} originals deleted, {} old bundles deleted",
        record.files_archived, record.files_deleted, record.backups_deleted
    )?;
    writeln!(out, "{}", "─".repeat(60))?;

    if let Some(detail) = &record.error_detail {
        writeln!(out, " Error: {detail}")?;
    }
    if !record.warnings.is_empty() {
        writeln!(out, " {} warning(s):", record.warnings.len())?;
        for warning in &record.warnings {
            writeln!(out, "   {warning}")?;
        }
    }
    if let Some(detail) = &report.notification.detail {
        let status = if report.notification.delivered {
            "sent"
        } else {
            "not sent"
        };
        writeln!(out, " Notification {status}: {detail}")?;
    }
    Ok(())
}

/// Print a dry-run preview.
pub fn print_plan<W: Write>(
    out: &mut W,
    config: &RetentionConfig,
    plan: &RunPlan,
) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "─".repeat(60))?;
    writeln!(out, " Dry run for {}", plan.source.display())?;
    writeln!(out, "{}", "─".repeat(60))?;

    writeln!(
        out,
        " {} file(s) older than {} days ({}):",
        plan.candidates.len(),
        config.log_retention_days,
        format_size(plan.candidate_bytes())
    )?;
    for candidate in &plan.candidates {
        writeln!(
            out,
            "   {:<48} {:>10}",
            candidate.path.display(),
            format_size(candidate.size)
        )?;
    }

    writeln!(
        out,
        " {} bundle(s) older than {} days in {}:",
        plan.stale_bundles.len(),
        config.backup_retention_days,
        plan.archive_dir.display()
    )?;
    for bundle in &plan.stale_bundles {
        writeln!(out, "   {}", bundle.path.display())?;
    }

    for warning in &plan.warnings {
        writeln!(out, " warning: {warning}")?;
    }
    Ok(())
}
