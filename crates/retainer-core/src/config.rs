//! Retention configuration.

use std::path::{Component, Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::format::ArchiveFormat;

/// Days of log retention when nothing valid is configured.
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;
/// Days of bundle retention when nothing valid is configured.
pub const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_ARCHIVE_PREFIX: &str = "logs_archive";
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "tar.gz";
pub const DEFAULT_ARCHIVE_DIR: &str = "archives";
pub const DEFAULT_RUN_LOG_FILE: &str = "archive_runs.log";
/// Daily at midnight.
pub const DEFAULT_SCHEDULE: &str = "0 0 * * *";

/// Settings for one archiving run.
///
/// Values are immutable once built; the `with_*` methods consume the config
/// and return an updated copy.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct RetentionConfig {
    /// Directory whose aging files are archived.
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub source_directory: Option<PathBuf>,

    /// Files strictly older than this many days are archived.
    #[builder(default = "DEFAULT_LOG_RETENTION_DAYS")]
    #[serde(default = "default_log_days")]
    pub log_retention_days: u32,

    /// Bundles strictly older than this many days are deleted.
    #[builder(default = "DEFAULT_BACKUP_RETENTION_DAYS")]
    #[serde(default = "default_backup_days")]
    pub backup_retention_days: u32,

    /// Address that receives run reports.
    #[builder(default, setter(into, strip_option))]
    #[serde(default)]
    pub notify_channel: Option<String>,

    #[builder(default = "DEFAULT_ARCHIVE_PREFIX.to_string()")]
    #[serde(default = "default_prefix")]
    pub archive_name_prefix: String,

    #[builder(default = "DEFAULT_ARCHIVE_EXTENSION.to_string()")]
    #[serde(default = "default_extension")]
    pub archive_extension: String,

    /// Name of the bundle directory inside the source directory.
    #[builder(default = "DEFAULT_ARCHIVE_DIR.to_string()")]
    #[serde(default = "default_archive_dir")]
    pub archive_dir_name: String,

    /// Name of the run log inside the bundle directory.
    #[builder(default = "DEFAULT_RUN_LOG_FILE.to_string()")]
    #[serde(default = "default_run_log")]
    pub run_log_file: String,

    /// How deep to look for files (1 = direct children only).
    #[builder(default = "1")]
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Cron expression used when installing a schedule.
    #[builder(default = "DEFAULT_SCHEDULE.to_string()")]
    #[serde(default = "default_schedule")]
    pub schedule_expression: String,
}

fn default_log_days() -> u32 {
    DEFAULT_LOG_RETENTION_DAYS
}

fn default_backup_days() -> u32 {
    DEFAULT_BACKUP_RETENTION_DAYS
}

fn default_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

fn default_extension() -> String {
    DEFAULT_ARCHIVE_EXTENSION.to_string()
}

fn default_archive_dir() -> String {
    DEFAULT_ARCHIVE_DIR.to_string()
}

fn default_run_log() -> String {
    DEFAULT_RUN_LOG_FILE.to_string()
}

fn default_max_depth() -> u32 {
    1
}

fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            source_directory: None,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            backup_retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
            notify_channel: None,
            archive_name_prefix: default_prefix(),
            archive_extension: default_extension(),
            archive_dir_name: default_archive_dir(),
            run_log_file: default_run_log(),
            max_depth: 1,
            schedule_expression: default_schedule(),
        }
    }
}

impl RetentionConfig {
    /// Create a new config builder.
    pub fn builder() -> RetentionConfigBuilder {
        RetentionConfigBuilder::default()
    }

    /// Create a default config for a source directory.
    pub fn new(source_directory: impl Into<PathBuf>) -> Self {
        Self::default().with_source_directory(source_directory)
    }

    pub fn with_source_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_directory = Some(dir.into());
        self
    }

    pub fn with_log_retention_days(mut self, days: u32) -> Self {
        self.log_retention_days = days;
        self
    }

    pub fn with_backup_retention_days(mut self, days: u32) -> Self {
        self.backup_retention_days = days;
        self
    }

    /// Set or clear the notification channel. Blank input clears it.
    pub fn with_notify_channel(mut self, channel: Option<String>) -> Self {
        self.notify_channel = channel
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn with_schedule_expression(mut self, expression: impl Into<String>) -> Self {
        self.schedule_expression = expression.into();
        self
    }

    /// Check the settings a run depends on and return the source directory.
    ///
    /// Performs no filesystem mutation.
    pub fn validate(&self) -> Result<&Path, ConfigError> {
        let source = self
            .source_directory
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingSourceDirectory)?;

        if !source.exists() {
            return Err(ConfigError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        if !source.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: source.to_path_buf(),
            });
        }

        let prefix = &self.archive_name_prefix;
        if prefix.is_empty()
            || prefix.contains(['/', '\\'])
            || prefix.contains(GLOB_META)
            || prefix.starts_with('.')
        {
            return Err(ConfigError::InvalidPrefix {
                prefix: prefix.clone(),
            });
        }

        check_plain_name("archive directory name", &self.archive_dir_name)?;
        check_plain_name("run log file name", &self.run_log_file)?;

        self.archive_format()?;
        Ok(source)
    }

    /// Resolve the configured extension to an archive format.
    pub fn archive_format(&self) -> Result<ArchiveFormat, ConfigError> {
        ArchiveFormat::from_extension(&self.archive_extension).ok_or_else(|| {
            ConfigError::UnsupportedExtension {
                extension: self.archive_extension.clone(),
            }
        })
    }

    /// Directory holding bundles and the run log.
    pub fn archive_dir(&self) -> Option<PathBuf> {
        self.source_directory
            .as_ref()
            .map(|s| s.join(&self.archive_dir_name))
    }

    /// Path of the append-only run log.
    pub fn run_log_path(&self) -> Option<PathBuf> {
        self.archive_dir().map(|d| d.join(&self.run_log_file))
    }

    /// Glob matching bundles written with this config.
    pub fn bundle_pattern(&self) -> String {
        format!(
            "{}_*.{}",
            self.archive_name_prefix,
            self.archive_extension.trim_start_matches('.')
        )
    }
}

/// Characters with meaning in the bundle glob.
const GLOB_META: [char; 6] = ['*', '?', '[', ']', '{', '}'];

/// Accept exactly one normal path component, so the result stays a direct
/// child of its parent.
fn check_plain_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !value.contains(['/', '\\']) => Ok(()),
        _ => Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        }),
    }
}

/// Parse a retention value typed by a user or read from a file.
///
/// Blank input means "unset" and yields the default silently. Anything that is
/// not a non-negative integer yields the default plus a warning message.
pub fn parse_retention_days(label: &str, input: &str, default: u32) -> (u32, Option<String>) {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return (default, None);
    }
    match trimmed.parse::<u32>() {
        Ok(days) => (days, None),
        Err(_) => {
            let warning =
                format!("Invalid {label} {trimmed:?}; using default of {default} days");
            tracing::warn!("{warning}");
            (default, Some(warning))
        }
    }
}

/// A retention value as it may appear in a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DaysValue {
    Number(i64),
    Text(String),
}

impl DaysValue {
    fn as_input(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// On-disk configuration. Every key is optional and overrides the defaults.
///
/// The file is only ever read; nothing in retainer writes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub source_directory: Option<PathBuf>,
    pub log_retention_days: Option<DaysValue>,
    pub backup_retention_days: Option<DaysValue>,
    pub notify_channel: Option<String>,
    pub archive_name_prefix: Option<String>,
    pub archive_extension: Option<String>,
    pub archive_dir_name: Option<String>,
    pub run_log_file: Option<String>,
    pub max_depth: Option<u32>,
    pub schedule_expression: Option<String>,
}

impl ConfigFile {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse TOML text.
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Layer this file over `base`, returning the result and any warnings.
    pub fn apply(self, base: RetentionConfig) -> (RetentionConfig, Vec<String>) {
        let mut config = base;
        let mut warnings = Vec::new();

        if let Some(dir) = self.source_directory {
            config.source_directory = Some(dir);
        }
        if let Some(value) = self.log_retention_days {
            let (days, warning) = parse_retention_days(
                "log retention",
                &value.as_input(),
                DEFAULT_LOG_RETENTION_DAYS,
            );
            config.log_retention_days = days;
            warnings.extend(warning);
        }
        if let Some(value) = self.backup_retention_days {
            let (days, warning) = parse_retention_days(
                "backup retention",
                &value.as_input(),
                DEFAULT_BACKUP_RETENTION_DAYS,
            );
            config.backup_retention_days = days;
            warnings.extend(warning);
        }
        if self.notify_channel.is_some() {
            config = config.with_notify_channel(self.notify_channel);
        }
        if let Some(prefix) = self.archive_name_prefix {
            config.archive_name_prefix = prefix;
        }
        if let Some(extension) = self.archive_extension {
            config.archive_extension = extension;
        }
        if let Some(dir) = self.archive_dir_name {
            config.archive_dir_name = dir;
        }
        if let Some(file) = self.run_log_file {
            config.run_log_file = file;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth.max(1);
        }
        if let Some(expression) = self.schedule_expression {
            config.schedule_expression = expression;
        }

        (config, warnings)
    }
}

/// Default location of the user config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("retainer").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RetentionConfig::builder()
            .source_directory("/var/log/app")
            .log_retention_days(3u32)
            .notify_channel("ops@example.com")
            .build()
            .unwrap();

        assert_eq!(config.source_directory, Some(PathBuf::from("/var/log/app")));
        assert_eq!(config.log_retention_days, 3);
        assert_eq!(config.backup_retention_days, DEFAULT_BACKUP_RETENTION_DAYS);
        assert_eq!(config.notify_channel.as_deref(), Some("ops@example.com"));
        assert_eq!(config.archive_extension, "tar.gz");
    }

    #[test]
    fn test_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.log_retention_days, 7);
        assert_eq!(config.backup_retention_days, 30);
        assert_eq!(config.archive_name_prefix, "logs_archive");
        assert_eq!(config.max_depth, 1);
        assert!(config.source_directory.is_none());
    }

    #[test]
    fn test_with_methods_return_new_values() {
        let original = RetentionConfig::new("/tmp/logs");
        let updated = original.clone().with_log_retention_days(14);
        assert_eq!(original.log_retention_days, 7);
        assert_eq!(updated.log_retention_days, 14);
    }

    #[test]
    fn test_blank_channel_clears() {
        let config = RetentionConfig::default()
            .with_notify_channel(Some("a@b.c".to_string()))
            .with_notify_channel(Some("   ".to_string()));
        assert!(config.notify_channel.is_none());
    }

    #[test]
    fn test_parse_retention_days() {
        assert_eq!(parse_retention_days("log retention", "14", 7), (14, None));
        assert_eq!(parse_retention_days("log retention", " 0 ", 7), (0, None));
        assert_eq!(parse_retention_days("log retention", "", 7), (7, None));

        let (days, warning) = parse_retention_days("log retention", "-3", 7);
        assert_eq!(days, 7);
        assert!(warning.unwrap().contains("-3"));

        let (days, warning) = parse_retention_days("backup retention", "abc", 30);
        assert_eq!(days, 30);
        assert!(warning.is_some());
    }

    #[test]
    fn test_validate_missing_source() {
        let config = RetentionConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSourceDirectory)
        ));

        let config = RetentionConfig::new("/definitely/not/here");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_glob_prefix() {
        let temp = tempfile::TempDir::new().unwrap();
        for prefix in ["logs[a]", "logs*", "a?b", "x{1,2}"] {
            let mut config = RetentionConfig::new(temp.path());
            config.archive_name_prefix = prefix.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidPrefix { .. })),
                "{prefix} accepted"
            );
        }
    }

    #[test]
    fn test_validate_rejects_escaping_names() {
        let temp = tempfile::TempDir::new().unwrap();
        for name in ["", ".", "..", "../elsewhere", "/tmp/archives", "nested/dir"] {
            let mut config = RetentionConfig::new(temp.path());
            config.archive_dir_name = name.to_string();
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidName { field: "archive directory name", .. })
                ),
                "archive dir {name:?} accepted"
            );

            let mut config = RetentionConfig::new(temp.path());
            config.run_log_file = name.to_string();
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidName { field: "run log file name", .. })
                ),
                "run log {name:?} accepted"
            );
        }

        let config = RetentionConfig::new(temp.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = RetentionConfig::new("/srv/logs");
        assert_eq!(config.archive_dir(), Some(PathBuf::from("/srv/logs/archives")));
        assert_eq!(
            config.run_log_path(),
            Some(PathBuf::from("/srv/logs/archives/archive_runs.log"))
        );
        assert_eq!(config.bundle_pattern(), "logs_archive_*.tar.gz");
    }

    #[test]
    fn test_config_file_apply() {
        let file = ConfigFile::parse(
            r#"
            source_directory = "/srv/logs"
            log_retention_days = 10
            backup_retention_days = "soon"
            archive_extension = "zip"
            "#,
        )
        .unwrap();

        let (config, warnings) = file.apply(RetentionConfig::default());
        assert_eq!(config.source_directory, Some(PathBuf::from("/srv/logs")));
        assert_eq!(config.log_retention_days, 10);
        assert_eq!(config.backup_retention_days, 30);
        assert_eq!(config.archive_extension, "zip");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() {
        assert!(ConfigFile::parse("retention = 3").is_err());
    }
}
