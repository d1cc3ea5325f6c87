//! Certflow configuration
//!
//! Both Certflow processes are configured through environment variables with
//! the `CERTFLOW_` prefix, deserialized into one [`Settings`] struct so the
//! manager and the proxy coordinator always agree on the shared contract
//! (store root, domain set, challenge directory).
//!
//! # Example
//!
//! ```text
//! CERTFLOW_DOMAIN=example.com
//! CERTFLOW_SUBDOMAINS=www,api
//! CERTFLOW_STAGE=production
//! CERTFLOW_ACME_CONTACT=admin@example.com
//! CERTFLOW_ACME_STAGING=false
//! CERTFLOW_CERT_ROOT=/etc/letsencrypt/live
//! ```
//!
//! Every value has a deployment-ready default except the domain itself.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable prefix for all settings
pub const ENV_PREFIX: &str = "CERTFLOW_";

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment stage flag
///
/// Drives configuration-mode selection on the proxy side: `dev` never
/// terminates TLS, `production` does as soon as a certificate exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStage {
    #[default]
    #[serde(alias = "development")]
    Dev,
    #[serde(alias = "prod")]
    Production,
}

impl DeploymentStage {
    pub fn is_production(self) -> bool {
        matches!(self, DeploymentStage::Production)
    }
}

/// Runtime settings shared by both Certflow processes
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Primary domain the certificate covers
    pub domain: String,

    /// Subdomain labels expanded against the primary domain
    /// (`www` becomes `www.example.com`)
    #[serde(default)]
    pub subdomains: Vec<String>,

    /// Deployment stage flag
    #[serde(default)]
    pub stage: DeploymentStage,

    /// ACME account contact address
    #[serde(default)]
    pub acme_contact: Option<String>,

    /// Use the ACME staging endpoint instead of production
    #[serde(default)]
    pub acme_staging: bool,

    /// External ACME client binary
    #[serde(default = "default_acme_binary")]
    pub acme_binary: String,

    /// Upper bound on one ACME client invocation, in seconds
    #[serde(default = "default_acme_timeout_secs")]
    pub acme_timeout_secs: u64,

    /// Root of the shared certificate store
    #[serde(default = "default_cert_root")]
    pub cert_root: PathBuf,

    /// Webroot directory the proxy serves ACME challenges from
    #[serde(default = "default_challenge_root")]
    pub challenge_root: PathBuf,

    /// Directory holding the per-mode configuration templates
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// Location the serving process reads its configuration from
    #[serde(default = "default_active_config")]
    pub active_config: PathBuf,

    /// Command validating a candidate configuration; `{config}` is replaced
    /// with the candidate path
    #[serde(default = "default_validate_command")]
    pub validate_command: Vec<String>,

    /// Command signalling the serving process to reload gracefully
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Upper bound on one serving-process control command, in seconds
    #[serde(default = "default_control_timeout_secs")]
    pub control_timeout_secs: u64,

    /// Request body size limit substituted into the configuration templates
    #[serde(default = "default_max_body_size")]
    pub max_body_size: String,

    /// Renewal check period, in seconds
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,

    /// Minimum remaining validity before renewal is attempted, in days
    #[serde(default = "default_validity_threshold_days")]
    pub validity_threshold_days: u32,

    /// Delay before the manager's first check, so the proxy can finish
    /// bringing up its listener for the challenge path
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Poll period while waiting for the certificate's first appearance,
    /// in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Window for coalescing change notifications, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_acme_binary() -> String {
    "certbot".to_string()
}

fn default_acme_timeout_secs() -> u64 {
    300
}

fn default_cert_root() -> PathBuf {
    PathBuf::from("/etc/letsencrypt/live")
}

fn default_challenge_root() -> PathBuf {
    PathBuf::from("/var/www/certbot")
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("/etc/certflow/templates")
}

fn default_active_config() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/default.conf")
}

fn default_validate_command() -> Vec<String> {
    vec!["nginx".into(), "-t".into(), "-c".into(), "{config}".into()]
}

fn default_reload_command() -> Vec<String> {
    vec!["nginx".into(), "-s".into(), "reload".into()]
}

fn default_control_timeout_secs() -> u64 {
    30
}

fn default_max_body_size() -> String {
    "10m".to_string()
}

fn default_renewal_interval_secs() -> u64 {
    12 * 3600
}

fn default_validity_threshold_days() -> u32 {
    30
}

fn default_startup_delay_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_debounce_ms() -> u64 {
    500
}

impl Settings {
    /// Load settings from `CERTFLOW_`-prefixed environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings: Settings = envy::prefixed(ENV_PREFIX).from_env()?;
        debug!(
            domain = %settings.domain,
            stage = ?settings.stage,
            cert_root = %settings.cert_root.display(),
            "Loaded settings from environment"
        );
        Ok(settings)
    }

    /// The full domain set: primary domain plus expanded subdomains
    pub fn all_domains(&self) -> Vec<String> {
        let mut domains = Vec::with_capacity(1 + self.subdomains.len());
        domains.push(self.domain.clone());
        for sub in &self.subdomains {
            domains.push(format!("{}.{}", sub, self.domain));
        }
        domains
    }

    pub fn acme_timeout(&self) -> Duration {
        Duration::from_secs(self.acme_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Checks shared by both processes
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("domain must not be empty".into()));
        }
        if self.domain.contains(['/', ' ']) {
            return Err(ConfigError::Invalid(format!(
                "domain '{}' contains invalid characters",
                self.domain
            )));
        }
        for sub in &self.subdomains {
            if sub.trim().is_empty() || sub.contains(['/', ' ', '.']) {
                return Err(ConfigError::Invalid(format!(
                    "subdomain label '{sub}' is not a bare label"
                )));
            }
        }
        if self.renewal_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "renewal_interval_secs must be positive".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.validity_threshold_days == 0 {
            return Err(ConfigError::Invalid(
                "validity_threshold_days must be positive".into(),
            ));
        }
        if self.validate_command.is_empty() || self.reload_command.is_empty() {
            return Err(ConfigError::Invalid(
                "validate_command and reload_command must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Additional checks for the certificate lifecycle manager
    ///
    /// The ACME account contact is only required where certificates are
    /// actually acquired.
    pub fn validate_manager(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.stage.is_production() && self.acme_contact.is_none() {
            return Err(ConfigError::Invalid(
                "acme_contact is required in production".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let iter = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        envy::prefixed(ENV_PREFIX)
            .from_iter(iter)
            .map_err(ConfigError::Env)
    }

    #[test]
    fn test_defaults_applied() {
        let settings = from_pairs(&[("CERTFLOW_DOMAIN", "example.com")]).unwrap();

        assert_eq!(settings.domain, "example.com");
        assert_eq!(settings.stage, DeploymentStage::Dev);
        assert_eq!(settings.validity_threshold_days, 30);
        assert_eq!(settings.renewal_interval(), Duration::from_secs(43200));
        assert_eq!(settings.poll_interval(), Duration::from_secs(60));
        assert_eq!(settings.acme_binary, "certbot");
        assert!(!settings.acme_staging);
        settings.validate().unwrap();
    }

    #[test]
    fn test_stage_parsing() {
        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_STAGE", "production"),
        ])
        .unwrap();
        assert!(settings.stage.is_production());

        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_STAGE", "dev"),
        ])
        .unwrap();
        assert!(!settings.stage.is_production());
    }

    #[test]
    fn test_subdomain_expansion() {
        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_SUBDOMAINS", "www,api"),
        ])
        .unwrap();

        assert_eq!(
            settings.all_domains(),
            vec!["example.com", "www.example.com", "api.example.com"]
        );
    }

    #[test]
    fn test_missing_domain_is_an_error() {
        assert!(from_pairs(&[]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_subdomain() {
        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_SUBDOMAINS", "www.extra"),
        ])
        .unwrap();

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_manager_requires_contact_in_production() {
        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_STAGE", "production"),
        ])
        .unwrap();

        assert!(settings.validate().is_ok());
        assert!(settings.validate_manager().is_err());

        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_STAGE", "production"),
            ("CERTFLOW_ACME_CONTACT", "admin@example.com"),
        ])
        .unwrap();
        settings.validate_manager().unwrap();
    }

    #[test]
    fn test_command_override_parsing() {
        let settings = from_pairs(&[
            ("CERTFLOW_DOMAIN", "example.com"),
            ("CERTFLOW_VALIDATE_COMMAND", "true"),
            ("CERTFLOW_RELOAD_COMMAND", "kill,-HUP,1"),
        ])
        .unwrap();

        assert_eq!(settings.validate_command, vec!["true"]);
        assert_eq!(settings.reload_command, vec!["kill", "-HUP", "1"]);
    }
}
