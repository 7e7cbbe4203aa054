//! Run coordination for retainer.
//!
//! [`RunCoordinator`] drives one archiving run through its states and turns
//! every collaborator failure into a [`RunRecord`](retainer_core::RunRecord).
//! The same crate owns the collaborators that talk to the host: the mail
//! [`Notifier`], the crontab [`SchedulerRegistrar`] and the append-only
//! [`RunLog`].

mod coordinator;
mod notify;
mod runlog;
mod schedule;

pub use coordinator::{RunCoordinator, RunPlan, RunReport, RunState, compose_notice};
pub use notify::{
    MailCommandNotifier, MailTransport, MemoryNotifier, Notice, Notifier, NotifyResult,
};
pub use runlog::{RunLog, RunLogError};
pub use schedule::{
    CrontabStore, FileCrontab, MARKER_FLAG, SchedulerRegistrar, SystemCrontab, default_marker,
    invocation_command, validate_cron_expression,
};
