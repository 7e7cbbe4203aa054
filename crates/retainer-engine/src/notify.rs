//! Run reports delivered through a local mail transport.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use retainer_core::NotifyError;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub delivered: bool,
    pub detail: Option<String>,
}

impl NotifyResult {
    pub fn delivered(detail: impl Into<String>) -> Self {
        Self {
            delivered: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            delivered: false,
            detail: Some(detail.into()),
        }
    }

    /// No channel configured.
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Delivers run reports.
///
/// Implementations never fail the caller: problems are reported in the
/// returned [`NotifyResult`].
pub trait Notifier: Send + Sync {
    fn notify(&self, channel: Option<&str>, subject: &str, body: &str) -> NotifyResult;
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, channel: Option<&str>, subject: &str, body: &str) -> NotifyResult {
        (**self).notify(channel, subject, body)
    }
}

impl<T: Notifier + ?Sized> Notifier for Box<T> {
    fn notify(&self, channel: Option<&str>, subject: &str, body: &str) -> NotifyResult {
        (**self).notify(channel, subject, body)
    }
}

/// Mail binary found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailTransport {
    /// `mail -s <subject> -- <address>`, body on stdin.
    Mail(PathBuf),
    /// `sendmail -t`, headers and body on stdin.
    Sendmail(PathBuf),
}

impl MailTransport {
    /// Locate `mail`, falling back to `sendmail`.
    pub fn detect() -> Result<Self, NotifyError> {
        if let Ok(path) = which::which("mail") {
            return Ok(Self::Mail(path));
        }
        if let Ok(path) = which::which("sendmail") {
            return Ok(Self::Sendmail(path));
        }
        for candidate in ["/usr/sbin/sendmail", "/usr/lib/sendmail"] {
            let path = PathBuf::from(candidate);
            if path.is_file() {
                return Ok(Self::Sendmail(path));
            }
        }
        Err(NotifyError::TransportUnavailable {
            tried: "mail, sendmail".to_string(),
        })
    }

    fn program(&self) -> &PathBuf {
        match self {
            Self::Mail(path) | Self::Sendmail(path) => path,
        }
    }

    fn command(&self, address: &str, subject: &str) -> Command {
        let mut cmd = Command::new(self.program());
        match self {
            Self::Mail(_) => {
                cmd.arg("-s").arg(subject).arg("--").arg(address);
            }
            Self::Sendmail(_) => {
                cmd.arg("-t");
            }
        }
        cmd
    }

    fn payload(&self, address: &str, subject: &str, body: &str) -> String {
        match self {
            Self::Mail(_) => format!("{body}\n"),
            Self::Sendmail(_) => {
                let subject = subject.replace(['\r', '\n'], " ");
                format!("To: {address}\nSubject: {subject}\n\n{body}\n")
            }
        }
    }
}

/// Sends reports with the host's `mail` or `sendmail` command.
#[derive(Debug, Clone, Default)]
pub struct MailCommandNotifier {
    transport: Option<MailTransport>,
}

impl MailCommandNotifier {
    /// Detect the transport on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific transport.
    pub fn with_transport(transport: MailTransport) -> Self {
        Self {
            transport: Some(transport),
        }
    }

    /// Send one message, returning the transport error on failure.
    pub fn send(&self, address: &str, subject: &str, body: &str) -> Result<String, NotifyError> {
        let transport = match &self.transport {
            Some(t) => t.clone(),
            None => MailTransport::detect()?,
        };
        let program = transport.program().display().to_string();

        let mut child = transport
            .command(address, subject)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| NotifyError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = transport.payload(address, subject, body);
            match stdin.write_all(payload.as_bytes()) {
                // The exit status explains an early close
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(source) => {
                    return Err(NotifyError::Spawn {
                        program: program.clone(),
                        source,
                    });
                }
                Ok(()) => {}
            }
        }

        let output = child.wait_with_output().map_err(|source| NotifyError::Spawn {
            program: program.clone(),
            source,
        })?;

        if output.status.success() {
            Ok(format!("sent to {address} via {program}"))
        } else {
            Err(NotifyError::Rejected {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Notifier for MailCommandNotifier {
    fn notify(&self, channel: Option<&str>, subject: &str, body: &str) -> NotifyResult {
        let Some(address) = channel.map(str::trim).filter(|c| !c.is_empty()) else {
            return NotifyResult::skipped();
        };

        match self.send(address, subject, body) {
            Ok(detail) => {
                tracing::info!("{detail}");
                NotifyResult::delivered(detail)
            }
            Err(err) => {
                tracing::warn!(channel = address, "notification not delivered: {err}");
                NotifyResult::failed(err.to_string())
            }
        }
    }
}

/// A notice captured by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub channel: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Records notices in memory instead of sending them.
///
/// Clones share the same buffer, so a caller can keep one handle and give
/// another to a coordinator.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice received so far, including ones without a channel.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, channel: Option<&str>, subject: &str, body: &str) -> NotifyResult {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notice {
                channel: channel.map(str::to_string),
                subject: subject.to_string(),
                body: body.to_string(),
            });

        match channel {
            Some(channel) => NotifyResult::delivered(format!("recorded for {channel}")),
            None => NotifyResult::skipped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_channel_is_silent() {
        let notifier = MailCommandNotifier::with_transport(MailTransport::Mail(PathBuf::from(
            "/nonexistent/mail",
        )));
        assert_eq!(notifier.notify(None, "s", "b"), NotifyResult::skipped());
        assert_eq!(notifier.notify(Some("  "), "s", "b"), NotifyResult::skipped());
    }

    #[test]
    fn test_spawn_failure_degrades() {
        let notifier = MailCommandNotifier::with_transport(MailTransport::Mail(PathBuf::from(
            "/nonexistent/mail",
        )));
        let result = notifier.notify(Some("ops@example.com"), "subject", "body");
        assert!(!result.delivered);
        assert!(result.detail.unwrap().contains("/nonexistent/mail"));
    }

    #[test]
    fn test_mail_address_never_parsed_as_option() {
        let transport = MailTransport::Mail(PathBuf::from("mail"));
        let cmd = transport.command("-oQ/tmp/x", "subject");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["-s", "subject", "--", "-oQ/tmp/x"]);
    }

    #[test]
    fn test_sendmail_payload_has_headers() {
        let transport = MailTransport::Sendmail(PathBuf::from("sendmail"));
        let payload = transport.payload("ops@example.com", "Archive\nfailed", "details");
        assert_eq!(
            payload,
            "To: ops@example.com\nSubject: Archive failed\n\ndetails\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rejected_status_carries_stderr() {
        // `false` ignores its arguments and exits 1
        let Ok(program) = which::which("false") else {
            return;
        };
        let notifier = MailCommandNotifier::with_transport(MailTransport::Mail(program));
        let err = notifier.send("ops@example.com", "s", "b").unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { .. }));
    }

    #[test]
    fn test_memory_notifier_shares_buffer() {
        let notifier = MemoryNotifier::new();
        let handle = notifier.clone();

        let result = notifier.notify(Some("ops@example.com"), "subject", "body");
        assert!(result.delivered);
        notifier.notify(None, "quiet", "body");

        let notices = handle.notices();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].channel.as_deref(), Some("ops@example.com"));
        assert_eq!(notices[1].channel, None);
    }
}
