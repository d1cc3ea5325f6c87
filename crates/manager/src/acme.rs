//! External ACME client integration
//!
//! Certflow never speaks the ACME protocol itself. Acquisition and renewal
//! are delegated to an external certbot-compatible client, which owns
//! account registration, challenge completion, and atomic writes into the
//! shared store. This module wraps that client behind [`AcmeClient`] so the
//! lifecycle loop can be tested without spawning processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use certflow_config::Settings;

/// Failure classes for renewal scheduling and diagnostics
///
/// All classes defer to the next scheduled tick; none triggers an immediate
/// retry, to avoid compounding upstream rate-limit penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Name resolution problems on the client side
    Dns,
    /// Transient connectivity failure reaching the CA
    Network,
    /// Upstream rate limiting
    RateLimit,
    /// Domain validation failed (challenge not reachable)
    Validation,
    /// Anything the stderr output did not identify
    Other,
}

impl FailureClass {
    /// Classify a failure from the external client's stderr
    fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many") {
            FailureClass::RateLimit
        } else if lower.contains("nxdomain") || lower.contains("dns problem") {
            FailureClass::Dns
        } else if lower.contains("invalid response")
            || lower.contains("challenge failed")
            || lower.contains("unauthorized")
            || lower.contains("validation")
        {
            FailureClass::Validation
        } else if lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("network")
        {
            FailureClass::Network
        } else {
            FailureClass::Other
        }
    }
}

/// Errors from driving the external ACME client
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("ACME client timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to launch ACME client '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("ACME client failed ({class:?}): {detail}")]
    ClientFailure { class: FailureClass, detail: String },
}

impl AcmeError {
    /// The failure class driving retry diagnostics
    pub fn class(&self) -> FailureClass {
        match self {
            AcmeError::Timeout(_) => FailureClass::Network,
            AcmeError::Spawn { .. } => FailureClass::Other,
            AcmeError::ClientFailure { class, .. } => *class,
        }
    }
}

/// Acquisition and renewal operations against the external ACME client
///
/// Both operations are idempotent and safe to invoke speculatively: the
/// client keeps an existing certificate when it is still valid and only
/// replaces it after the new one is confirmed.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Acquire an initial certificate for the full domain set in one request
    async fn acquire(&self, domains: &[String]) -> Result<(), AcmeError>;

    /// Renew the certificate if due; a no-op when not yet due
    async fn renew(&self) -> Result<(), AcmeError>;
}

/// ACME client driving a certbot-compatible command line
pub struct CommandAcmeClient {
    binary: String,
    contact: Option<String>,
    webroot: PathBuf,
    staging: bool,
    timeout: Duration,
}

impl CommandAcmeClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            binary: settings.acme_binary.clone(),
            contact: settings.acme_contact.clone(),
            webroot: settings.challenge_root.clone(),
            staging: settings.acme_staging,
            timeout: settings.acme_timeout(),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<(), AcmeError> {
        debug!(binary = %self.binary, args = ?args, "Invoking ACME client");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A killed client never leaves a torn bundle; its writes into the
            // store are atomic
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AcmeError::Timeout(self.timeout))?
            .map_err(|e| AcmeError::Spawn {
                binary: self.binary.clone(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let class = FailureClass::classify(&stderr);
        let detail: String = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no stderr output")
            .to_string();

        Err(AcmeError::ClientFailure { class, detail })
    }
}

#[async_trait]
impl AcmeClient for CommandAcmeClient {
    async fn acquire(&self, domains: &[String]) -> Result<(), AcmeError> {
        let mut args: Vec<String> = vec![
            "certonly".into(),
            "--non-interactive".into(),
            "--agree-tos".into(),
            "--keep-until-expiring".into(),
            "--webroot".into(),
            "-w".into(),
            self.webroot.display().to_string(),
        ];

        match &self.contact {
            Some(contact) => {
                args.push("--email".into());
                args.push(contact.clone());
            }
            None => args.push("--register-unsafely-without-email".into()),
        }

        if self.staging {
            args.push("--staging".into());
        }

        for domain in domains {
            args.push("-d".into());
            args.push(domain.clone());
        }

        self.run(args).await
    }

    async fn renew(&self) -> Result<(), AcmeError> {
        let mut args: Vec<String> = vec![
            "renew".into(),
            "--non-interactive".into(),
            "--webroot".into(),
            "-w".into(),
            self.webroot.display().to_string(),
        ];

        if self.staging {
            args.push("--staging".into());
        }

        self.run(args).await
    }
}

/// Log an ACME failure with diagnostics matched to its class
pub fn log_failure(operation: &str, err: &AcmeError) {
    match err.class() {
        FailureClass::Validation => {
            warn!(
                error = %err,
                "{operation} failed domain validation; check that DNS A/AAAA \
                 records point at this host and port 80 is reachable from the \
                 internet; retrying at the next scheduled check"
            );
        }
        FailureClass::RateLimit => {
            warn!(
                error = %err,
                "{operation} hit an upstream rate limit; deferring to the \
                 next scheduled check"
            );
        }
        class => {
            warn!(
                error = %err,
                class = ?class,
                "{operation} failed; retrying at the next scheduled check"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(
            FailureClass::classify("Error creating new order :: too many certificates"),
            FailureClass::RateLimit
        );
    }

    #[test]
    fn test_classify_dns() {
        assert_eq!(
            FailureClass::classify("DNS problem: NXDOMAIN looking up A for example.com"),
            FailureClass::Dns
        );
    }

    #[test]
    fn test_classify_validation() {
        assert_eq!(
            FailureClass::classify("Invalid response from http://example.com/.well-known/..."),
            FailureClass::Validation
        );
    }

    #[test]
    fn test_classify_network() {
        assert_eq!(
            FailureClass::classify("Connection refused by acme-v02.api.letsencrypt.org"),
            FailureClass::Network
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(
            FailureClass::classify("something unexpected"),
            FailureClass::Other
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_binary_name() {
        let client = CommandAcmeClient {
            binary: "/nonexistent/acme-client".into(),
            contact: None,
            webroot: PathBuf::from("/tmp"),
            staging: true,
            timeout: Duration::from_secs(5),
        };

        let err = client
            .acquire(&["example.com".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::Spawn { .. }));
        assert_eq!(err.class(), FailureClass::Other);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_invocation_classified_from_stderr() {
        // `sh -c` stands in for the external client
        let client = CommandAcmeClient {
            binary: "sh".into(),
            contact: None,
            webroot: PathBuf::from("/tmp"),
            staging: false,
            timeout: Duration::from_secs(5),
        };

        let err = client
            .run(vec![
                "-c".into(),
                "echo 'DNS problem: NXDOMAIN' >&2; exit 1".into(),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.class(), FailureClass::Dns);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invocation_timeout() {
        let client = CommandAcmeClient {
            binary: "sleep".into(),
            contact: None,
            webroot: PathBuf::from("/tmp"),
            staging: false,
            timeout: Duration::from_millis(50),
        };

        let err = client.run(vec!["5".into()]).await.unwrap_err();
        assert!(matches!(err, AcmeError::Timeout(_)));
    }
}
