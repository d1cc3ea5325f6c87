//! Serving process control interface
//!
//! The serving process (nginx or compatible) provides two operations:
//! validate a configuration and reload gracefully. Both are modelled as a
//! trait so reload coordination can be tested without a live server.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from serving-process control operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Control command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to launch control command '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Reload command failed: {0}")]
    ReloadFailed(String),

    #[error("Control command is empty")]
    EmptyCommand,
}

/// Validate and reload operations on the serving process
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Check a candidate configuration for syntax/semantic errors
    async fn validate(&self, candidate: &Path) -> Result<(), ControlError>;

    /// Signal the serving process to reload its configuration gracefully
    ///
    /// Existing connections drain; new connections use the new
    /// configuration.
    async fn reload(&self) -> Result<(), ControlError>;
}

/// Control implementation driving configurable command lines
///
/// The validate command may reference the candidate path with a `{config}`
/// placeholder, e.g. `nginx -t -c {config}`.
pub struct CommandProxyControl {
    validate_command: Vec<String>,
    reload_command: Vec<String>,
    timeout: Duration,
}

impl CommandProxyControl {
    pub fn new(validate_command: Vec<String>, reload_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            validate_command,
            reload_command,
            timeout,
        }
    }

    async fn run(&self, argv: &[String]) -> Result<(), ControlError> {
        let (program, args) = argv.split_first().ok_or(ControlError::EmptyCommand)?;

        debug!(program = %program, args = ?args, "Running control command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))?
            .map_err(|e| ControlError::Spawn {
                program: program.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no stderr output")
                .to_string();
            Err(ControlError::ValidationFailed(detail))
        }
    }
}

#[async_trait]
impl ProxyControl for CommandProxyControl {
    async fn validate(&self, candidate: &Path) -> Result<(), ControlError> {
        let argv: Vec<String> = self
            .validate_command
            .iter()
            .map(|arg| arg.replace("{config}", &candidate.display().to_string()))
            .collect();
        self.run(&argv).await
    }

    async fn reload(&self) -> Result<(), ControlError> {
        self.run(&self.reload_command).await.map_err(|e| match e {
            ControlError::ValidationFailed(detail) => ControlError::ReloadFailed(detail),
            other => other,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory control double recording every call
    pub struct RecordingControl {
        fail_validation: AtomicBool,
        validations: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl RecordingControl {
        pub fn passing() -> Self {
            Self {
                fail_validation: AtomicBool::new(false),
                validations: AtomicUsize::new(0),
                reloads: AtomicUsize::new(0),
            }
        }

        pub fn failing_validation() -> Self {
            let control = Self::passing();
            control.fail_validation.store(true, Ordering::SeqCst);
            control
        }

        pub fn set_validation_failure(&self, fail: bool) {
            self.fail_validation.store(fail, Ordering::SeqCst);
        }

        pub fn validations(&self) -> usize {
            self.validations.load(Ordering::SeqCst)
        }

        pub fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProxyControl for RecordingControl {
        async fn validate(&self, _candidate: &Path) -> Result<(), ControlError> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.fail_validation.load(Ordering::SeqCst) {
                Err(ControlError::ValidationFailed(
                    "simulated corrupt certificate".into(),
                ))
            } else {
                Ok(())
            }
        }

        async fn reload(&self) -> Result<(), ControlError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validate_substitutes_candidate_path() {
        // Passes only when the placeholder resolved to an existing file
        let control = CommandProxyControl::new(
            vec!["test".into(), "-f".into(), "{config}".into()],
            vec!["true".into()],
            Duration::from_secs(5),
        );

        let file = tempfile::NamedTempFile::new().unwrap();
        control.validate(file.path()).await.unwrap();

        let missing = PathBuf::from("/nonexistent/candidate.conf");
        assert!(control.validate(&missing).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reload_failure_reports_stderr() {
        let control = CommandProxyControl::new(
            vec!["true".into()],
            vec![
                "sh".into(),
                "-c".into(),
                "echo 'reload refused' >&2; exit 1".into(),
            ],
            Duration::from_secs(5),
        );

        let err = control.reload().await.unwrap_err();
        match err {
            ControlError::ReloadFailed(detail) => assert!(detail.contains("reload refused")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let control =
            CommandProxyControl::new(vec![], vec!["true".into()], Duration::from_secs(5));
        let err = control.validate(Path::new("/tmp/c.conf")).await.unwrap_err();
        assert!(matches!(err, ControlError::EmptyCommand));
    }
}
