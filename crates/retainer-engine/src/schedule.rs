//! Crontab registration for scheduled runs.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use retainer_core::{
    DEFAULT_ARCHIVE_DIR, DEFAULT_ARCHIVE_EXTENSION, DEFAULT_ARCHIVE_PREFIX, DEFAULT_RUN_LOG_FILE,
    RetentionConfig, ScheduleEntry, ScheduleError,
};

/// Argument that identifies the entry retainer manages.
pub const MARKER_FLAG: &str = "--marker";

const CRON_MACROS: &[&str] = &[
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Where the crontab lives.
pub trait CrontabStore {
    /// Current table, empty if none exists.
    fn load(&self) -> Result<String, ScheduleError>;

    /// Replace the whole table.
    fn store(&self, table: &str) -> Result<(), ScheduleError>;
}

impl<T: CrontabStore + ?Sized> CrontabStore for Box<T> {
    fn load(&self) -> Result<String, ScheduleError> {
        (**self).load()
    }

    fn store(&self, table: &str) -> Result<(), ScheduleError> {
        (**self).store(table)
    }
}

/// The invoking user's crontab, edited through the `crontab` binary.
#[derive(Debug, Clone)]
pub struct SystemCrontab {
    program: PathBuf,
}

impl SystemCrontab {
    pub fn new() -> Result<Self, ScheduleError> {
        let program = which::which("crontab").map_err(|e| ScheduleError::Unavailable {
            message: format!("crontab not found: {e}"),
        })?;
        Ok(Self { program })
    }

    fn unavailable(&self, err: io::Error) -> ScheduleError {
        ScheduleError::Unavailable {
            message: format!("{}: {err}", self.program.display()),
        }
    }
}

impl CrontabStore for SystemCrontab {
    fn load(&self) -> Result<String, ScheduleError> {
        let output = Command::new(&self.program)
            .arg("-l")
            .output()
            .map_err(|e| self.unavailable(e))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_ascii_lowercase().contains("no crontab") {
            return Ok(String::new());
        }
        Err(ScheduleError::Unavailable {
            message: stderr.trim().to_string(),
        })
    }

    fn store(&self, table: &str) -> Result<(), ScheduleError> {
        let mut child = Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.unavailable(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(table.as_bytes())
                .map_err(|e| self.unavailable(e))?;
        }

        let output = child.wait_with_output().map_err(|e| self.unavailable(e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ScheduleError::Unavailable {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// A crontab kept in a plain file.
#[derive(Debug, Clone)]
pub struct FileCrontab {
    path: PathBuf,
}

impl FileCrontab {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CrontabStore for FileCrontab {
    fn load(&self) -> Result<String, ScheduleError> {
        match fs::read_to_string(&self.path) {
            Ok(table) => Ok(table),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(ScheduleError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn store(&self, table: &str) -> Result<(), ScheduleError> {
        fs::write(&self.path, table).map_err(|source| ScheduleError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Installs, replaces and removes the single entry owned by a marker.
#[derive(Debug, Clone)]
pub struct SchedulerRegistrar<S> {
    store: S,
}

impl<S: CrontabStore> SchedulerRegistrar<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Install or replace the entry for `marker`. Other lines are kept as-is.
    pub fn install_schedule(
        &self,
        cron_expression: &str,
        invocation_command: &str,
        marker: &str,
    ) -> Result<ScheduleEntry, ScheduleError> {
        validate_marker(marker)?;
        validate_cron_expression(cron_expression)?;
        if !line_has_marker(invocation_command, marker) {
            return Err(ScheduleError::Command {
                message: format!("command does not carry {MARKER_FLAG} {marker}"),
            });
        }

        let entry = ScheduleEntry {
            cron_expression: cron_expression.trim().to_string(),
            invocation_command: invocation_command.trim().to_string(),
            marker: marker.to_string(),
        };

        let new_line = entry.to_line();
        let table = self.store.load()?;
        let mut lines: Vec<&str> = table
            .lines()
            .filter(|line| !line_has_marker(line, marker))
            .collect();
        lines.push(&new_line);

        self.store.store(&render(&lines))?;
        tracing::info!(marker, "schedule installed: {new_line}");
        Ok(entry)
    }

    /// Remove the entry for `marker`. Returns whether one existed.
    pub fn remove_schedule(&self, marker: &str) -> Result<bool, ScheduleError> {
        validate_marker(marker)?;

        let table = self.store.load()?;
        let kept: Vec<&str> = table
            .lines()
            .filter(|line| !line_has_marker(line, marker))
            .collect();
        if kept.len() == table.lines().count() {
            return Ok(false);
        }

        self.store.store(&render(&kept))?;
        tracing::info!(marker, "schedule removed");
        Ok(true)
    }

    /// The installed entry for `marker`, if any.
    pub fn find_schedule(&self, marker: &str) -> Result<Option<ScheduleEntry>, ScheduleError> {
        validate_marker(marker)?;
        Ok(self
            .store
            .load()?
            .lines()
            .filter(|line| line_has_marker(line, marker))
            .find_map(|line| parse_line(line, marker)))
    }
}

fn render(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut table = lines.join("\n");
    table.push('\n');
    table
}

/// Whether a crontab line carries `--marker <marker>`.
fn line_has_marker(line: &str, marker: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return false;
    }
    let inline = format!("{MARKER_FLAG}={marker}");
    match shlex::split(trimmed) {
        Some(words) => words
            .windows(2)
            .any(|pair| pair[0] == MARKER_FLAG && pair[1] == marker)
            || words.iter().any(|w| *w == inline),
        None => {
            let spaced = format!("{MARKER_FLAG} {marker}");
            trimmed
                .split(&spaced)
                .skip(1)
                .any(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        }
    }
}

fn parse_line(line: &str, marker: &str) -> Option<ScheduleEntry> {
    let line = line.trim();
    let field_count = if line.starts_with('@') { 1 } else { 5 };

    let mut rest = line;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }

    Some(ScheduleEntry {
        cron_expression: fields.join(" "),
        invocation_command: rest.trim().to_string(),
        marker: marker.to_string(),
    })
}

fn validate_marker(marker: &str) -> Result<(), ScheduleError> {
    let valid = !marker.is_empty()
        && marker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ScheduleError::InvalidMarker {
            marker: marker.to_string(),
        })
    }
}

/// Check a five-field cron expression or an `@` macro.
pub fn validate_cron_expression(expression: &str) -> Result<(), ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return if CRON_MACROS.contains(&trimmed) {
            Ok(())
        } else {
            Err(invalid(format!("unknown macro {trimmed}")))
        };
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
    }

    const FIELDS: [(&str, u32, u32, bool); 5] = [
        ("minute", 0, 59, false),
        ("hour", 0, 23, false),
        ("day of month", 1, 31, false),
        ("month", 1, 12, true),
        ("day of week", 0, 7, true),
    ];

    for (field, (name, min, max, named)) in fields.iter().zip(FIELDS) {
        check_field(field, min, max, named).map_err(|reason| invalid(format!("{name}: {reason}")))?;
    }
    Ok(())
}

fn check_field(field: &str, min: u32, max: u32, named: bool) -> Result<(), String> {
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("bad step {step:?}")),
            }
        }

        if range == "*" {
            continue;
        }

        let bounds: Vec<&str> = range.split('-').collect();
        if bounds.is_empty() || bounds.len() > 2 {
            return Err(format!("bad range {range:?}"));
        }
        for bound in &bounds {
            if named && bound.len() == 3 && bound.chars().all(|c| c.is_ascii_alphabetic()) {
                continue;
            }
            match bound.parse::<u32>() {
                Ok(n) if (min..=max).contains(&n) => {}
                Ok(n) => return Err(format!("{n} outside {min}-{max}")),
                Err(_) => return Err(format!("bad value {bound:?}")),
            }
        }
    }
    Ok(())
}

/// Default marker for a source directory: one entry per directory.
pub fn default_marker(source_directory: &Path) -> String {
    let hash = blake3::hash(source_directory.as_os_str().as_encoded_bytes());
    format!("retainer-{}", &hash.to_hex()[..12])
}

/// Build the command cron runs: `<exe> run <config flags> --marker <marker>`.
///
/// Arguments are shell-quoted and `%` is escaped, since cron treats a bare
/// `%` as a newline.
pub fn invocation_command(
    executable: &Path,
    config: &RetentionConfig,
    marker: &str,
) -> Result<String, ScheduleError> {
    validate_marker(marker)?;

    let utf8 = |path: &Path| {
        path.to_str()
            .map(str::to_string)
            .ok_or_else(|| ScheduleError::Command {
                message: format!("path is not valid UTF-8: {}", path.display()),
            })
    };

    let source = config
        .source_directory
        .as_deref()
        .ok_or_else(|| ScheduleError::Command {
            message: "source directory is not set".to_string(),
        })?;

    let mut args = vec![
        utf8(executable)?,
        "run".to_string(),
        "--source".to_string(),
        utf8(source)?,
        "--log-days".to_string(),
        config.log_retention_days.to_string(),
        "--backup-days".to_string(),
        config.backup_retention_days.to_string(),
    ];
    if let Some(channel) = &config.notify_channel {
        args.extend(["--notify".to_string(), channel.clone()]);
    }
    let optional = [
        ("--prefix", &config.archive_name_prefix, DEFAULT_ARCHIVE_PREFIX),
        ("--extension", &config.archive_extension, DEFAULT_ARCHIVE_EXTENSION),
        ("--archive-dir", &config.archive_dir_name, DEFAULT_ARCHIVE_DIR),
        ("--run-log", &config.run_log_file, DEFAULT_RUN_LOG_FILE),
    ];
    for (flag, value, default) in optional {
        if value != default {
            args.extend([flag.to_string(), value.clone()]);
        }
    }
    if config.max_depth != 1 {
        args.extend(["--max-depth".to_string(), config.max_depth.to_string()]);
    }
    args.extend([MARKER_FLAG.to_string(), marker.to_string()]);

    let command = shlex::try_join(args.iter().map(String::as_str)).map_err(|e| {
        ScheduleError::Command {
            message: e.to_string(),
        }
    })?;
    Ok(command.replace('%', "\\%"))
}
