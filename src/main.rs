//! retainer - Archive aging log files under a retention policy.
//!
//! Usage:
//!   retainer                      Interactive menu
//!   retainer run [OPTIONS]        Archive and prune once, exit with the outcome
//!   retainer schedule install     Register a recurring run with cron
//!   retainer schedule remove      Remove the recurring run
//!   retainer schedule show        Show the installed entry
//!   retainer history              Show recent runs
//!   retainer --help               Show help

mod menu;
mod report;

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use retainer_core::{
    ConfigFile, DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_LOG_RETENTION_DAYS, RetentionConfig,
    default_config_path, parse_retention_days,
};
use retainer_engine::{
    CrontabStore, FileCrontab, MailCommandNotifier, MemoryNotifier, RunCoordinator, RunLog,
    SchedulerRegistrar, SystemCrontab, default_marker, invocation_command,
};

use crate::menu::Menu;
use crate::report::{print_plan, print_report};

#[derive(Parser)]
#[command(
    name = "retainer",
    version,
    about = "Archive aging log files under a retention policy",
    long_about = "retainer bundles log files older than a retention window into a \
                  timestamped archive, deletes the originals, prunes old archives \
                  and reports the outcome.\n\n\
                  Run without a subcommand for the interactive menu, or use \
                  `retainer run` from scripts and cron."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: ConfigArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Settings that override the config file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Directory whose old files are archived
    #[arg(short, long, global = true)]
    source: Option<PathBuf>,

    /// Archive files older than this many days
    #[arg(long, global = true, value_name = "DAYS", allow_hyphen_values = true)]
    log_days: Option<String>,

    /// Delete archives older than this many days
    #[arg(long, global = true, value_name = "DAYS", allow_hyphen_values = true)]
    backup_days: Option<String>,

    /// Address that receives run reports (empty to disable)
    #[arg(long, global = true, value_name = "ADDRESS")]
    notify: Option<String>,

    /// Archive file name prefix
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Archive extension (tar, tar.gz, tar.xz, tar.bz2, zip)
    #[arg(long, global = true)]
    extension: Option<String>,

    /// Archive directory name inside the source directory
    #[arg(long, global = true, value_name = "NAME")]
    archive_dir: Option<String>,

    /// Run log file name inside the archive directory
    #[arg(long, global = true, value_name = "NAME")]
    run_log: Option<String>,

    /// How deep to look for files (1 = direct children only)
    #[arg(long, global = true, value_name = "DEPTH")]
    max_depth: Option<u32>,

    /// Cron expression used by `schedule install`
    #[arg(long, global = true, value_name = "CRON")]
    schedule: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Archive and prune once, then exit with the outcome
    Run {
        /// Identifier of the schedule entry that started this run
        #[arg(long)]
        marker: Option<String>,

        /// Show what would be archived and pruned without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the run record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the recurring cron entry
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show recent runs from the run log
    History {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Install or replace the entry for this source directory
    Install {
        #[command(flatten)]
        target: ScheduleTarget,
    },
    /// Remove the entry for this source directory
    Remove {
        #[command(flatten)]
        target: ScheduleTarget,
    },
    /// Show the entry for this source directory
    Show {
        #[command(flatten)]
        target: ScheduleTarget,
    },
}

#[derive(Args)]
struct ScheduleTarget {
    /// Entry identifier (defaults to one derived from the source directory)
    #[arg(long)]
    marker: Option<String>,

    /// Edit this file instead of the user's crontab
    #[arg(long, value_name = "FILE")]
    crontab_file: Option<PathBuf>,
}

impl ConfigArgs {
    /// Layer these flags over `base`.
    fn apply(self, base: RetentionConfig) -> (RetentionConfig, Vec<String>) {
        let mut config = base;
        let mut warnings = Vec::new();

        if let Some(source) = self.source {
            config = config.with_source_directory(source);
        }
        if let Some(input) = self.log_days {
            let (days, warning) =
                parse_retention_days("log retention", &input, DEFAULT_LOG_RETENTION_DAYS);
            config = config.with_log_retention_days(days);
            warnings.extend(warning);
        }
        if let Some(input) = self.backup_days {
            let (days, warning) =
                parse_retention_days("backup retention", &input, DEFAULT_BACKUP_RETENTION_DAYS);
            config = config.with_backup_retention_days(days);
            warnings.extend(warning);
        }
        if self.notify.is_some() {
            config = config.with_notify_channel(self.notify);
        }
        if let Some(prefix) = self.prefix {
            config.archive_name_prefix = prefix;
        }
        if let Some(extension) = self.extension {
            config.archive_extension = extension;
        }
        if let Some(dir) = self.archive_dir {
            config.archive_dir_name = dir;
        }
        if let Some(file) = self.run_log {
            config.run_log_file = file;
        }
        if let Some(depth) = self.max_depth {
            config.max_depth = depth.max(1);
        }
        if let Some(expression) = self.schedule {
            config = config.with_schedule_expression(expression);
        }

        (config, warnings)
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.settings)?;

    match cli.command {
        Some(Command::Run {
            marker,
            dry_run,
            json,
        }) => run_once(config, marker.as_deref(), dry_run, json),
        Some(Command::Schedule { action }) => {
            run_schedule(&config, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::History { count }) => {
            run_history(&config, count)?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            run_menu(config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Defaults, then the config file, then command-line flags.
fn load_config(path: Option<&Path>, args: ConfigArgs) -> Result<RetentionConfig> {
    let mut config = RetentionConfig::default();

    let file = match path {
        Some(path) => Some(ConfigFile::load(path)?),
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => Some(ConfigFile::load(&path)?),
            None => None,
        },
    };
    if let Some(file) = file {
        let (layered, warnings) = file.apply(config);
        config = layered;
        for warning in warnings {
            eprintln!("warning: {warning}");
        }
    }

    let (mut config, warnings) = args.apply(config);
    for warning in warnings {
        eprintln!("warning: {warning}");
    }

    if let Some(source) = config.source_directory.take() {
        let absolute = std::path::absolute(&source)
            .with_context(|| format!("Invalid source directory: {}", source.display()))?;
        config.source_directory = Some(absolute);
    }

    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

/// Non-interactive run.
fn run_once(
    config: RetentionConfig,
    marker: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    if let Some(marker) = marker {
        tracing::info!(marker, "scheduled run");
    }

    if dry_run {
        let coordinator = RunCoordinator::new(config, MemoryNotifier::new());
        return match coordinator.plan() {
            Ok(plan) if json => {
                println!("{}", serde_json::to_string_pretty(&plan)?);
                Ok(ExitCode::SUCCESS)
            }
            Ok(plan) => {
                print_plan(&mut io::stdout().lock(), coordinator.config(), &plan)?;
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                eprintln!("error: {err}");
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let report = RunCoordinator::new(config, MailCommandNotifier::new()).run();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&mut io::stdout().lock(), &report)?;
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

fn run_schedule(config: &RetentionConfig, action: ScheduleAction) -> Result<()> {
    let (target, install) = match action {
        ScheduleAction::Install { target } => (target, Some(true)),
        ScheduleAction::Remove { target } => (target, Some(false)),
        ScheduleAction::Show { target } => (target, None),
    };

    let Some(source) = config.source_directory.as_deref() else {
        bail!("No source directory configured; pass --source or set it in the config file");
    };
    let marker = target.marker.unwrap_or_else(|| default_marker(source));

    let store: Box<dyn CrontabStore> = match target.crontab_file {
        Some(path) => Box::new(FileCrontab::new(path)),
        None => Box::new(SystemCrontab::new()?),
    };
    let registrar = SchedulerRegistrar::new(store);

    match install {
        Some(true) => {
            config.validate()?;
            let executable = std::env::current_exe().context("Cannot locate retainer binary")?;
            let command = invocation_command(&executable, config, &marker)?;
            let entry =
                registrar.install_schedule(&config.schedule_expression, &command, &marker)?;
            println!("Installed: {}", entry.to_line());
        }
        Some(false) => {
            if registrar.remove_schedule(&marker)? {
                println!("Removed schedule {marker}");
            } else {
                println!("No schedule {marker} installed");
            }
        }
        None => match registrar.find_schedule(&marker)? {
            Some(entry) => println!("{}", entry.to_line()),
            None => println!("No schedule {marker} installed"),
        },
    }

    Ok(())
}

fn run_history(config: &RetentionConfig, count: usize) -> Result<()> {
    let Some(path) = config.run_log_path() else {
        bail!("No source directory configured; pass --source or set it in the config file");
    };

    let lines = RunLog::new(&path).read_recent(count)?;
    if lines.is_empty() {
        println!("No runs recorded in {}", path.display());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn run_menu(config: RetentionConfig) -> Result<()> {
    let store: Box<dyn CrontabStore> = match SystemCrontab::new() {
        Ok(crontab) => Box::new(crontab),
        Err(err) => {
            tracing::warn!("{err}");
            Box::new(UnavailableCrontab(err.to_string()))
        }
    };
    let executable = std::env::current_exe().context("Cannot locate retainer binary")?;

    let menu = Menu::new(
        BufReader::new(io::stdin()),
        io::stdout(),
        config,
        Arc::new(MailCommandNotifier::new()),
        SchedulerRegistrar::new(store),
        executable,
    );
    menu.run()?;
    Ok(())
}

/// Stands in when no `crontab` binary exists, so scheduling reports the
/// problem instead of the menu refusing to start.
struct UnavailableCrontab(String);

impl CrontabStore for UnavailableCrontab {
    fn load(&self) -> Result<String, retainer_core::ScheduleError> {
        Err(retainer_core::ScheduleError::Unavailable {
            message: self.0.clone(),
        })
    }

    fn store(&self, _table: &str) -> Result<(), retainer_core::ScheduleError> {
        Err(retainer_core::ScheduleError::Unavailable {
            message: self.0.clone(),
        })
    }
}
