use retainer_core::{RetentionConfig, RunOutcome, SECS_PER_DAY};
use retainer_engine::{
    CrontabStore, FileCrontab, MemoryNotifier, Notifier, NotifyResult, RunCoordinator, RunLog,
    RunState, SchedulerRegistrar, default_marker, invocation_command,
};
use retainer_ops::RunLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn write_aged(path: &Path, contents: &str, days: u64) {
    fs::write(path, contents).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(days * SECS_PER_DAY))
        .unwrap();
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn extract(bundle: &Path) -> BTreeMap<String, String> {
    let decoder = flate2::read::GzDecoder::new(File::open(bundle).unwrap());
    let mut archive = tar::Archive::new(decoder);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            (name, text)
        })
        .collect()
}

fn config(source: &Path) -> RetentionConfig {
    RetentionConfig::new(source)
        .with_notify_channel(Some("ops@example.com".to_string()))
}

#[test]
fn test_old_files_are_archived_and_removed() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    for i in 0..3 {
        write_aged(&source.join(format!("old_{i}.log")), &format!("old {i}\n"), 10);
    }
    for i in 0..2 {
        write_aged(&source.join(format!("new_{i}.log")), &format!("new {i}\n"), 2);
    }

    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config(source), notifier.clone()).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.record.files_archived, 3);
    assert_eq!(report.record.files_deleted, 3);
    assert_eq!(names(source), vec!["archives", "new_0.log", "new_1.log"]);

    let bundle = report.bundle.as_ref().unwrap();
    assert_eq!(report.record.archive_path.as_ref(), Some(&bundle.path));
    let contents = extract(&bundle.path);
    assert_eq!(contents.len(), 3);
    for i in 0..3 {
        assert_eq!(contents[&format!("old_{i}.log")], format!("old {i}\n"));
    }

    assert_eq!(
        report.trail,
        vec![
            RunState::Idle,
            RunState::Validating,
            RunState::Scanning,
            RunState::Archiving,
            RunState::PruningOriginals,
            RunState::PruningBundles,
            RunState::Notifying,
            RunState::Done(RunOutcome::Success),
        ]
    );

    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].subject.contains("succeeded"));
    assert!(notices[0].body.contains("Files archived: 3"));

    assert!(report.logged);
    let log = RunLog::new(source.join("archives/archive_runs.log"));
    let lines = log.read_recent(10).unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("| success | archived=3 deleted=3 backups_deleted=0"));
}

#[test]
fn test_stale_bundles_pruned_without_archiving() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&archives.join("logs_archive_20260801_000000.tar.gz"), "a", 40);
    write_aged(&archives.join("logs_archive_20260802_000000.tar.gz"), "b", 40);
    write_aged(&archives.join("logs_archive_20261011_000000.tar.gz"), "c", 5);
    write_aged(&archives.join("unrelated.tar.gz"), "d", 90);
    write_aged(&source.join("fresh.log"), "fresh", 1);

    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config(source), notifier.clone()).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert_eq!(report.record.backups_deleted, 2);
    assert!(report.bundle.is_none());
    assert!(!report.visited(RunState::Archiving));
    assert!(!report.visited(RunState::PruningOriginals));
    assert!(report.visited(RunState::PruningBundles));

    let remaining: Vec<String> = names(&archives)
        .into_iter()
        .filter(|n| n.ends_with(".tar.gz"))
        .collect();
    assert_eq!(
        remaining,
        vec!["logs_archive_20261011_000000.tar.gz", "unrelated.tar.gz"]
    );
    assert_eq!(notifier.notices().len(), 1);
}

#[test]
fn test_stale_bundles_pruned_alongside_new_bundle() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&archives.join("logs_archive_20260801_000000.tar.gz"), "a", 40);
    write_aged(&archives.join("logs_archive_20260802_000000.tar.gz"), "b", 40);
    write_aged(&archives.join("logs_archive_20261011_000000.tar.gz"), "c", 5);
    write_aged(&source.join("old.log"), "old", 12);

    let report = RunCoordinator::new(config(source), MemoryNotifier::new()).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert_eq!(report.record.backups_deleted, 2);
    let bundle = report.bundle.unwrap();
    assert!(bundle.path.exists());
    assert!(archives.join("logs_archive_20261011_000000.tar.gz").exists());
}

#[test]
fn test_abandoned_staging_files_expire_with_bundles() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&archives.join(".logs_archive_a1b2c3.partial"), "torn", 40);
    write_aged(&archives.join(".logs_archive_d4e5f6.partial"), "torn", 2);
    write_aged(&archives.join(".other_zzz.partial"), "foreign", 40);

    let report = RunCoordinator::new(config(source), MemoryNotifier::new()).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert_eq!(report.record.backups_deleted, 0);
    assert!(report.record.warnings.is_empty());
    assert!(!archives.join(".logs_archive_a1b2c3.partial").exists());
    assert!(archives.join(".logs_archive_d4e5f6.partial").exists());
    assert!(archives.join(".other_zzz.partial").exists());
}

#[test]
fn test_glob_characters_in_prefix_fail_closed() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&archives.join("logs[a]_20200101_000000.tar.gz"), "a", 40);
    write_aged(&source.join("old.log"), "old", 10);

    let mut config = config(source);
    config.archive_name_prefix = "logs[a]".to_string();
    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config, notifier.clone()).run();

    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert!(!report.visited(RunState::Scanning));
    assert!(
        report
            .record
            .error_detail
            .as_deref()
            .unwrap()
            .contains("Invalid archive name prefix")
    );
    assert!(source.join("old.log").exists());
    assert_eq!(notifier.notices().len(), 1);
}

#[test]
fn test_archive_dir_outside_source_fails_closed() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("logs");
    fs::create_dir(&source).unwrap();
    write_aged(&source.join("old.log"), "old", 10);

    for name in ["", "..", "../elsewhere"] {
        let mut config = config(&source);
        config.archive_dir_name = name.to_string();
        let report = RunCoordinator::new(config, MemoryNotifier::new()).run();

        assert_eq!(report.outcome(), RunOutcome::Failure, "{name:?}");
        assert!(!report.logged);
        assert_eq!(names(&source), vec!["old.log"]);
        assert_eq!(names(temp.path()), vec!["logs"]);
    }

    let mut config = config(&source);
    config.run_log_file = "../runs.log".to_string();
    let report = RunCoordinator::new(config, MemoryNotifier::new()).run();
    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert_eq!(names(&source), vec!["old.log"]);
}

#[test]
fn test_zero_day_backup_retention_keeps_new_bundle() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    write_aged(&source.join("old.log"), "old", 3);

    let config = config(source)
        .with_log_retention_days(0)
        .with_backup_retention_days(0);
    let report = RunCoordinator::new(config, MemoryNotifier::new()).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert!(report.bundle.unwrap().path.exists());
}

#[test]
fn test_missing_source_fails_closed() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("does_not_exist");

    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config(&source), notifier.clone()).run();

    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert_eq!(report.exit_code(), 1);
    assert!(!source.exists());
    assert!(names(temp.path()).is_empty());
    assert!(!report.logged);
    assert_eq!(
        report.trail,
        vec![
            RunState::Idle,
            RunState::Validating,
            RunState::Notifying,
            RunState::Done(RunOutcome::Failure),
        ]
    );

    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].channel.as_deref(), Some("ops@example.com"));
    assert_eq!(
        notices[0].subject,
        format!("[retainer] Log archiving FAILED for {}", source.display())
    );
    assert!(notices[0].body.contains("Outcome: failure"));
    assert!(notices[0].body.contains("Source directory does not exist"));
}

#[test]
fn test_unset_source_fails_closed() {
    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(RetentionConfig::default(), notifier.clone()).run();

    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert_eq!(
        report.record.error_detail.as_deref(),
        Some("Source directory is not set")
    );
    assert_eq!(notifier.notices().len(), 1);
    assert_eq!(notifier.notices()[0].channel, None);
}

#[test]
fn test_held_lock_fails_run() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&source.join("old.log"), "old", 10);

    let _held = RunLock::acquire(&archives).unwrap();
    let report = RunCoordinator::new(config(source), MemoryNotifier::new()).run();

    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert!(
        report
            .record
            .error_detail
            .as_deref()
            .unwrap()
            .contains("Another run is in progress")
    );
    assert!(source.join("old.log").exists());
    assert!(report.logged);
}

#[cfg(unix)]
#[test]
fn test_unreadable_candidate_fails_archive_but_prunes_bundles() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let source = temp.path();
    let archives = source.join("archives");
    fs::create_dir(&archives).unwrap();
    write_aged(&archives.join("logs_archive_20260801_000000.tar.gz"), "a", 40);
    write_aged(&source.join("a.log"), "a", 10);
    let locked = source.join("b.log");
    write_aged(&locked, "b", 10);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read the file anyway
    if File::open(&locked).is_ok() {
        return;
    }

    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config(source), notifier.clone()).run();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    assert_eq!(report.outcome(), RunOutcome::Failure);
    assert!(report.bundle.is_none());
    assert!(!report.visited(RunState::PruningOriginals));
    assert!(report.visited(RunState::PruningBundles));
    assert_eq!(report.record.backups_deleted, 1);
    assert!(source.join("a.log").exists());

    let leftovers: Vec<String> = names(&archives)
        .into_iter()
        .filter(|n| n.contains("logs_archive"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
    assert!(notifier.notices()[0].subject.contains("FAILED"));
}

#[cfg(unix)]
#[test]
fn test_undeletable_originals_make_run_partial() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let source = temp.path().join("logs");
    let archives = source.join("archives");
    fs::create_dir_all(&archives).unwrap();
    write_aged(&source.join("old.log"), "old", 10);
    fs::set_permissions(&source, fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users can unlink anyway
    if File::create(source.join("probe")).is_ok() {
        fs::set_permissions(&source, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let notifier = MemoryNotifier::new();
    let report = RunCoordinator::new(config(&source), notifier.clone()).run();
    fs::set_permissions(&source, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.record.files_archived, 1);
    assert_eq!(report.record.files_deleted, 0);
    assert!(report.bundle.is_some());
    assert!(source.join("old.log").exists());

    let notice = &notifier.notices()[0];
    assert!(notice.subject.contains("FAILED"));
    assert!(notice.body.contains("could not be deleted"));
}

struct RefusingNotifier;

impl Notifier for RefusingNotifier {
    fn notify(&self, _channel: Option<&str>, _subject: &str, _body: &str) -> NotifyResult {
        NotifyResult::failed("relay refused")
    }
}

#[test]
fn test_notification_failure_is_only_a_warning() {
    let temp = TempDir::new().unwrap();
    write_aged(&temp.path().join("old.log"), "old", 10);

    let report = RunCoordinator::new(config(temp.path()), RefusingNotifier).run();

    assert_eq!(report.outcome(), RunOutcome::Success);
    assert!(!report.notification.delivered);
    assert!(
        report
            .record
            .warnings
            .iter()
            .any(|w| w.contains("relay refused"))
    );
}

#[test]
fn test_each_run_appends_one_line() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();

    for _ in 0..3 {
        write_aged(&source.join("old.log"), "old", 10);
        let report = RunCoordinator::new(config(source), MemoryNotifier::new()).run();
        assert_eq!(report.outcome(), RunOutcome::Success);
    }

    let lines = RunLog::new(source.join("archives/archive_runs.log"))
        .read_recent(100)
        .unwrap();
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_plan_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let source = temp.path();
    write_aged(&source.join("old.log"), "old", 10);
    write_aged(&source.join("new.log"), "new", 1);

    let notifier = MemoryNotifier::new();
    let plan = RunCoordinator::new(config(source), notifier.clone())
        .plan()
        .unwrap();

    assert_eq!(plan.candidates.len(), 1);
    assert_eq!(plan.candidates[0].path, source.join("old.log"));
    assert!(plan.stale_bundles.is_empty());
    assert_eq!(plan.candidate_bytes(), 3);
    assert_eq!(names(source), vec!["new.log", "old.log"]);
    assert!(notifier.notices().is_empty());
}

#[test]
fn test_reinstalling_schedule_keeps_one_entry() {
    let temp = TempDir::new().unwrap();
    let table = temp.path().join("crontab");
    fs::write(
        &table,
        "MAILTO=root\n# nightly backup\n30 1 * * * /usr/local/bin/backup.sh\n",
    )
    .unwrap();

    let source = PathBuf::from("/srv/logs");
    let marker = default_marker(&source);
    let registrar = SchedulerRegistrar::new(FileCrontab::new(&table));
    let config = RetentionConfig::new(&source);

    let command = invocation_command(Path::new("/usr/bin/retainer"), &config, &marker).unwrap();
    registrar.install_schedule("0 0 * * *", &command, &marker).unwrap();
    let command = invocation_command(
        Path::new("/usr/bin/retainer"),
        &config.with_log_retention_days(14),
        &marker,
    )
    .unwrap();
    registrar.install_schedule("0 3 * * *", &command, &marker).unwrap();

    let text = registrar.store().load().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "MAILTO=root");
    assert_eq!(lines[1], "# nightly backup");
    assert_eq!(lines[2], "30 1 * * * /usr/local/bin/backup.sh");
    assert!(lines[3].starts_with("0 3 * * * /usr/bin/retainer run"));
    assert!(lines[3].contains("--log-days 14"));

    let entry = registrar.find_schedule(&marker).unwrap().unwrap();
    assert_eq!(entry.cron_expression, "0 3 * * *");
    assert_eq!(entry.to_line(), lines[3]);

    assert!(registrar.remove_schedule(&marker).unwrap());
    assert!(!registrar.remove_schedule(&marker).unwrap());
    assert_eq!(
        fs::read_to_string(&table).unwrap(),
        "MAILTO=root\n# nightly backup\n30 1 * * * /usr/local/bin/backup.sh\n"
    );
}

#[test]
fn test_invalid_expression_leaves_table_alone() {
    let temp = TempDir::new().unwrap();
    let table = temp.path().join("crontab");
    let registrar = SchedulerRegistrar::new(FileCrontab::new(&table));

    let result = registrar.install_schedule("every day", "retainer run --marker m", "m");
    assert!(result.is_err());
    assert!(!table.exists());
}
