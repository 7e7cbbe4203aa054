//! Interactive numbered menu.
//!
//! Each action produces a new [`RetentionConfig`]; nothing is mutated in
//! place. A small wizard tracks which setting is still missing so that
//! pressing Enter performs the natural next step.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};

use retainer_core::{
    DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_LOG_RETENTION_DAYS, RetentionConfig,
    parse_retention_days,
};
use retainer_engine::{
    CrontabStore, Notifier, RunCoordinator, SchedulerRegistrar, default_marker,
    invocation_command,
};

use crate::report::print_report;

/// Numbered menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Display, FromRepr)]
#[repr(u8)]
pub enum MenuAction {
    #[strum(to_string = "Set source directory")]
    SetSourceDirectory = 1,
    #[strum(to_string = "Set log retention (days)")]
    SetLogRetention = 2,
    #[strum(to_string = "Set backup retention (days)")]
    SetBackupRetention = 3,
    #[strum(to_string = "Run archiving now")]
    RunArchive = 4,
    #[strum(to_string = "Set notification address")]
    SetNotifyChannel = 5,
    #[strum(to_string = "Install or update schedule")]
    InstallSchedule = 6,
    #[strum(to_string = "Exit")]
    Exit = 7,
}

impl MenuAction {
    /// Parse a typed menu number.
    pub fn from_input(input: &str) -> Option<Self> {
        input.trim().parse::<u8>().ok().and_then(Self::from_repr)
    }
}

/// Which setting the wizard expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    AwaitDirectory,
    AwaitLogRetention,
    AwaitBackupRetention,
    ReadyToRun,
}

impl WizardState {
    /// Action performed when the user just presses Enter.
    pub fn suggested(self) -> MenuAction {
        match self {
            Self::AwaitDirectory => MenuAction::SetSourceDirectory,
            Self::AwaitLogRetention => MenuAction::SetLogRetention,
            Self::AwaitBackupRetention => MenuAction::SetBackupRetention,
            Self::ReadyToRun => MenuAction::RunArchive,
        }
    }

    /// State after `action` completed successfully.
    pub fn after(self, action: MenuAction) -> Self {
        match (self, action) {
            (Self::AwaitDirectory, MenuAction::SetSourceDirectory) => Self::AwaitLogRetention,
            (Self::AwaitLogRetention, MenuAction::SetLogRetention) => Self::AwaitBackupRetention,
            (Self::AwaitBackupRetention, MenuAction::SetBackupRetention) => Self::ReadyToRun,
            (state, _) => state,
        }
    }

    fn initial(config: &RetentionConfig) -> Self {
        if config.source_directory.is_some() {
            Self::AwaitLogRetention
        } else {
            Self::AwaitDirectory
        }
    }
}

/// The interactive session.
pub struct Menu<R, W, S> {
    input: R,
    output: W,
    config: RetentionConfig,
    state: WizardState,
    notifier: Arc<dyn Notifier>,
    registrar: SchedulerRegistrar<S>,
    executable: PathBuf,
}

impl<R: BufRead, W: Write, S: CrontabStore> Menu<R, W, S> {
    pub fn new(
        input: R,
        output: W,
        config: RetentionConfig,
        notifier: Arc<dyn Notifier>,
        registrar: SchedulerRegistrar<S>,
        executable: PathBuf,
    ) -> Self {
        let state = WizardState::initial(&config);
        Self {
            input,
            output,
            config,
            state,
            notifier,
            registrar,
            executable,
        }
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    /// Loop until Exit or end of input; returns the final config.
    pub fn run(mut self) -> io::Result<RetentionConfig> {
        loop {
            self.render()?;
            let Some(line) = self.read_line()? else {
                writeln!(self.output)?;
                break;
            };

            let action = if line.trim().is_empty() {
                self.state.suggested()
            } else {
                match MenuAction::from_input(&line) {
                    Some(action) => action,
                    None => {
                        writeln!(self.output, "Invalid choice: {}", line.trim())?;
                        continue;
                    }
                }
            };

            if action == MenuAction::Exit {
                break;
            }
            if self.dispatch(action)? {
                self.state = self.state.after(action);
            }
        }
        Ok(self.config)
    }

    fn render(&mut self) -> io::Result<()> {
        let source = self
            .config
            .source_directory
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string());
        let channel = self.config.notify_channel.as_deref().unwrap_or("(none)");

        writeln!(self.output)?;
        writeln!(self.output, "{}", "─".repeat(60))?;
        writeln!(self.output, " Source directory:  {source}")?;
        writeln!(
            self.output,
            " Log retention:     {} days",
            self.config.log_retention_days
        )?;
        writeln!(
            self.output,
            " Backup retention:  {} days",
            self.config.backup_retention_days
        )?;
        writeln!(self.output, " Notify:            {channel}")?;
        writeln!(self.output, "{}", "─".repeat(60))?;
        for action in MenuAction::iter() {
            writeln!(self.output, " {}) {action}", action as u8)?;
        }
        write!(
            self.output,
            "Choose [Enter = {}]: ",
            self.state.suggested()
        )?;
        self.output.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn prompt(&mut self, question: &str) -> io::Result<String> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        Ok(self.read_line()?.unwrap_or_default())
    }

    /// Perform `action`. Returns whether it completed.
    fn dispatch(&mut self, action: MenuAction) -> io::Result<bool> {
        match action {
            MenuAction::SetSourceDirectory => self.set_source_directory(),
            MenuAction::SetLogRetention => {
                let days = self.ask_days("log retention", DEFAULT_LOG_RETENTION_DAYS)?;
                if let Some(days) = days {
                    self.config = self.config.clone().with_log_retention_days(days);
                }
                Ok(true)
            }
            MenuAction::SetBackupRetention => {
                let days = self.ask_days("backup retention", DEFAULT_BACKUP_RETENTION_DAYS)?;
                if let Some(days) = days {
                    self.config = self.config.clone().with_backup_retention_days(days);
                }
                Ok(true)
            }
            MenuAction::RunArchive => self.run_archive(),
            MenuAction::SetNotifyChannel => {
                let input = self.prompt("Notification address (blank to disable): ")?;
                self.config = self.config.clone().with_notify_channel(Some(input));
                Ok(true)
            }
            MenuAction::InstallSchedule => self.install_schedule(),
            MenuAction::Exit => Ok(true),
        }
    }

    fn set_source_directory(&mut self) -> io::Result<bool> {
        let input = self.prompt("Source directory: ")?;
        let input = input.trim();
        if input.is_empty() {
            writeln!(self.output, "Source directory unchanged.")?;
            return Ok(self.config.source_directory.is_some());
        }

        let path = std::path::absolute(Path::new(input))?;
        if !path.is_dir() {
            writeln!(self.output, "Not a directory: {}", path.display())?;
            return Ok(false);
        }
        self.config = self.config.clone().with_source_directory(path);
        Ok(true)
    }

    /// Ask for a day count. Blank keeps the current value (`None`).
    fn ask_days(&mut self, label: &str, default: u32) -> io::Result<Option<u32>> {
        let input = self.prompt(&format!("{label} in days [default {default}]: "))?;
        if input.trim().is_empty() {
            return Ok(None);
        }
        let (days, warning) = parse_retention_days(label, &input, default);
        if let Some(warning) = warning {
            writeln!(self.output, "{warning}")?;
        }
        Ok(Some(days))
    }

    fn run_archive(&mut self) -> io::Result<bool> {
        if self.config.source_directory.is_none() {
            writeln!(self.output, "Set a source directory first.")?;
            self.state = WizardState::AwaitDirectory;
            return Ok(false);
        }

        writeln!(self.output, "Archiving...")?;
        let report =
            RunCoordinator::new(self.config.clone(), Arc::clone(&self.notifier)).run();
        print_report(&mut self.output, &report)?;
        Ok(true)
    }

    fn install_schedule(&mut self) -> io::Result<bool> {
        let Some(source) = self.config.source_directory.clone() else {
            writeln!(self.output, "Set a source directory first.")?;
            return Ok(false);
        };

        let marker = default_marker(&source);
        let result = invocation_command(&self.executable, &self.config, &marker).and_then(
            |command| {
                self.registrar.install_schedule(
                    &self.config.schedule_expression,
                    &command,
                    &marker,
                )
            },
        );

        match result {
            Ok(entry) => {
                writeln!(self.output, "Scheduled: {}", entry.to_line())?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!("schedule not installed: {err}");
                writeln!(self.output, "Schedule not installed: {err}")?;
                Ok(false)
            }
        }
    }
}
