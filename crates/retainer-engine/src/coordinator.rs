//! The per-invocation state machine.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use strum::Display;

use retainer_core::{
    ArchiveBundle, ArchiveError, FileCandidate, RetentionConfig, RunError, RunOutcome, RunRecord,
    ScanError,
};
use retainer_ops::{ArchiveWriter, BundleOutcome, Pruner, RunLock, staging_pattern};
use retainer_scan::{AgeFilter, ScanReport};

use crate::notify::{Notifier, NotifyResult};
use crate::runlog::RunLog;

/// Steps of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Idle,
    Validating,
    Scanning,
    Archiving,
    PruningOriginals,
    PruningBundles,
    Notifying,
    Done(RunOutcome),
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub record: RunRecord,
    pub bundle: Option<ArchiveBundle>,
    /// States visited, starting at `Idle` and ending at `Done`.
    pub trail: Vec<RunState>,
    pub notification: NotifyResult,
    /// Whether the record reached the run log.
    pub logged: bool,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        self.record.outcome
    }

    pub fn exit_code(&self) -> i32 {
        self.record.outcome.exit_code()
    }

    /// Whether the run passed through `state`.
    pub fn visited(&self, state: RunState) -> bool {
        self.trail.contains(&state)
    }
}

/// What a run would do right now, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub source: PathBuf,
    pub archive_dir: PathBuf,
    pub candidates: Vec<FileCandidate>,
    pub stale_bundles: Vec<FileCandidate>,
    pub warnings: Vec<String>,
}

impl RunPlan {
    pub fn candidate_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.size).sum()
    }
}

/// Mutable state threaded through one run.
struct Run {
    trail: Vec<RunState>,
    record: RunRecord,
    bundle: Option<ArchiveBundle>,
}

impl Run {
    fn new() -> Self {
        Self {
            trail: vec![RunState::Idle],
            record: RunRecord::new(RunOutcome::Success),
            bundle: None,
        }
    }

    fn enter(&mut self, state: RunState) {
        tracing::debug!(%state, "run state");
        self.trail.push(state);
    }

    fn fail(&mut self, err: &RunError) {
        tracing::error!("run failed: {err}");
        self.record.outcome = RunOutcome::Failure;
        self.record.error_detail = Some(err.to_string());
    }
}

/// Runs validate, scan, archive, prune, notify and log for one config.
pub struct RunCoordinator {
    config: RetentionConfig,
    notifier: Box<dyn Notifier>,
    reference_time: Option<SystemTime>,
}

impl RunCoordinator {
    pub fn new(config: RetentionConfig, notifier: impl Notifier + 'static) -> Self {
        Self {
            config,
            notifier: Box::new(notifier),
            reference_time: None,
        }
    }

    /// Measure file ages from `time` instead of the start of the run.
    pub fn with_reference_time(mut self, time: SystemTime) -> Self {
        self.reference_time = Some(time);
        self
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Execute one run. Never panics on collaborator failure; every problem
    /// ends up in the returned record.
    pub fn run(&self) -> RunReport {
        let reference_time = self.reference_time.unwrap_or_else(SystemTime::now);
        let mut run = Run::new();

        run.enter(RunState::Validating);
        let source = match self.config.validate() {
            Ok(source) => source.to_path_buf(),
            Err(err) => {
                run.fail(&err.into());
                return self.finish(run, None);
            }
        };
        let archive_dir = source.join(&self.config.archive_dir_name);
        let run_log = RunLog::new(archive_dir.join(&self.config.run_log_file));

        let _lock = match self.prepare(&archive_dir) {
            Ok(lock) => lock,
            Err(err) => {
                run.fail(&err);
                let log = archive_dir.is_dir().then_some(run_log);
                return self.finish(run, log);
            }
        };

        run.enter(RunState::Scanning);
        match self.scan_originals(&source, &archive_dir, reference_time) {
            Ok(scan) => {
                run.record
                    .warnings
                    .extend(scan.warnings.iter().map(ToString::to_string));
                if scan.is_empty() {
                    tracing::info!(
                        source = %source.display(),
                        "no files older than {} days",
                        self.config.log_retention_days
                    );
                } else {
                    self.archive_and_prune(&mut run, &source, &archive_dir, &scan.candidates);
                }
            }
            Err(err) => run.fail(&err.into()),
        }

        run.enter(RunState::PruningBundles);
        self.prune_bundles(&mut run, &archive_dir, reference_time);

        self.finish(run, Some(run_log))
    }

    /// Validate and scan without touching anything.
    pub fn plan(&self) -> Result<RunPlan, RunError> {
        let reference_time = self.reference_time.unwrap_or_else(SystemTime::now);
        let source = self.config.validate()?.to_path_buf();
        let archive_dir = source.join(&self.config.archive_dir_name);

        let scan = self.scan_originals(&source, &archive_dir, reference_time)?;
        let bundles = AgeFilter {
            root: archive_dir.clone(),
            max_depth: 1,
            min_age_days: self.config.backup_retention_days,
            reference_time,
            name_pattern: Some(self.config.bundle_pattern()),
            excluded: Vec::new(),
        };
        let stale = match bundles.scan() {
            Ok(report) => report,
            Err(ScanError::NotFound { .. }) => ScanReport::default(),
            Err(err) => return Err(err.into()),
        };

        let warnings = scan
            .warnings
            .iter()
            .chain(&stale.warnings)
            .map(ToString::to_string)
            .collect();

        Ok(RunPlan {
            source,
            archive_dir,
            candidates: scan.candidates,
            stale_bundles: stale.candidates,
            warnings,
        })
    }

    fn prepare(&self, archive_dir: &Path) -> Result<RunLock, RunError> {
        fs::create_dir_all(archive_dir).map_err(|source| ArchiveError::CreateDestination {
            path: archive_dir.to_path_buf(),
            source,
        })?;
        RunLock::acquire(archive_dir)
    }

    fn scan_originals(
        &self,
        source: &Path,
        archive_dir: &Path,
        reference_time: SystemTime,
    ) -> Result<ScanReport, ScanError> {
        AgeFilter {
            root: source.to_path_buf(),
            max_depth: self.config.max_depth,
            min_age_days: self.config.log_retention_days,
            reference_time,
            name_pattern: None,
            excluded: vec![archive_dir.to_path_buf()],
        }
        .scan()
    }

    fn archive_and_prune(
        &self,
        run: &mut Run,
        source: &Path,
        archive_dir: &Path,
        candidates: &[FileCandidate],
    ) {
        run.enter(RunState::Archiving);
        let writer = ArchiveWriter::new(
            archive_dir,
            &self.config.archive_name_prefix,
            &self.config.archive_extension,
        )
        .with_source_root(source);

        let bundle = match writer.write_bundle(candidates) {
            Ok(BundleOutcome::Written(bundle)) => bundle,
            Ok(BundleOutcome::NothingToArchive) => return,
            Err(err) => {
                run.fail(&err.into());
                return;
            }
        };
        run.record.archive_path = Some(bundle.path.clone());
        run.record.files_archived = bundle.source_file_count;
        run.bundle = Some(bundle);

        run.enter(RunState::PruningOriginals);
        let pruned = Pruner::new().delete_paths(candidates.iter().map(|c| c.path.clone()));
        run.record.files_deleted = pruned.deleted_count();

        if !pruned.is_clean() {
            let failures: Vec<String> = pruned.errors.iter().map(ToString::to_string).collect();
            let detail = format!(
                "{} of {} archived files could not be deleted: {}",
                failures.len(),
                candidates.len(),
                failures.join("; ")
            );
            tracing::warn!("{detail}");
            run.record.outcome = RunOutcome::Partial;
            run.record.error_detail = Some(detail);
        }
    }

    fn prune_bundles(&self, run: &mut Run, archive_dir: &Path, reference_time: SystemTime) {
        let mut pruner = Pruner::new().with_reference_time(reference_time);
        if let Some(bundle) = &run.bundle {
            pruner = pruner.protect(&bundle.path);
        }

        let pattern = self.config.bundle_pattern();
        match pruner.delete_older_than(
            archive_dir,
            1,
            self.config.backup_retention_days,
            Some(&pattern),
        ) {
            Ok(report) => {
                run.record.backups_deleted = report.deleted_count();
                run.record.warnings.extend(
                    report
                        .errors
                        .iter()
                        .map(|e| format!("bundle not deleted: {e}")),
                );
                run.record
                    .warnings
                    .extend(report.warnings.iter().map(ToString::to_string));
            }
            Err(err) => {
                tracing::warn!("bundle pruning skipped: {err}");
                run.record
                    .warnings
                    .push(format!("bundle pruning skipped: {err}"));
                return;
            }
        }

        // Staging files from interrupted runs expire with the bundles
        let staging = staging_pattern(&self.config.archive_name_prefix);
        match Pruner::new().with_reference_time(reference_time).delete_older_than(
            archive_dir,
            1,
            self.config.backup_retention_days,
            Some(&staging),
        ) {
            Ok(report) => {
                if report.deleted_count() > 0 {
                    tracing::info!(
                        count = report.deleted_count(),
                        "removed abandoned staging files"
                    );
                }
                run.record.warnings.extend(
                    report
                        .errors
                        .iter()
                        .map(|e| format!("staging file not deleted: {e}")),
                );
            }
            Err(err) => tracing::warn!("staging cleanup skipped: {err}"),
        }
    }

    fn finish(&self, mut run: Run, log: Option<RunLog>) -> RunReport {
        run.enter(RunState::Notifying);
        let channel = self.config.notify_channel.as_deref();
        let (subject, body) = compose_notice(&self.config, &run.record);
        let notification = self.notifier.notify(channel, &subject, &body);
        if channel.is_some() && !notification.delivered {
            run.record.warnings.push(format!(
                "notification not delivered: {}",
                notification.detail.as_deref().unwrap_or("unknown error")
            ));
        }

        let logged = match log {
            Some(log) => match log.append(&run.record) {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!("{err}");
                    false
                }
            },
            None => false,
        };

        let outcome = run.record.outcome;
        run.enter(RunState::Done(outcome));
        tracing::info!(
            %outcome,
            archived = run.record.files_archived,
            deleted = run.record.files_deleted,
            backups_deleted = run.record.backups_deleted,
            "run finished"
        );

        RunReport {
            record: run.record,
            bundle: run.bundle,
            trail: run.trail,
            notification,
            logged,
        }
    }
}

/// Subject and body of the report for `record`.
///
/// Partial runs share the failure subject; the body carries the error detail
/// verbatim.
pub fn compose_notice(config: &RetentionConfig, record: &RunRecord) -> (String, String) {
    let source = config
        .source_directory
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string());

    let subject = if record.outcome.is_degraded() {
        format!("[retainer] Log archiving FAILED for {source}")
    } else {
        format!("[retainer] Log archiving succeeded for {source}")
    };

    let archive = record
        .archive_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "none".to_string());

    let mut body = format!(
        "Outcome: {}\nTime: {}\nSource: {source}\nArchive: {archive}\n\
         Files archived: {}\nOriginals deleted: {}\nOld bundles deleted: {}\n",
        record.outcome,
        record.timestamp.format("%Y-%m-%d %H:%M:%S %z"),
        record.files_archived,
        record.files_deleted,
        record.backups_deleted,
    );
    if let Some(detail) = &record.error_detail {
        body.push_str("\nError:\n");
        body.push_str(detail);
        body.push('\n');
    }
    if !record.warnings.is_empty() {
        body.push_str("\nWarnings:\n");
        for warning in &record.warnings {
            body.push_str("  - ");
            body.push_str(warning);
            body.push('\n');
        }
    }

    (subject, body)
}
