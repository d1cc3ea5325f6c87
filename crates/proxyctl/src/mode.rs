//! Configuration mode selection
//!
//! Deterministically chooses one of three proxy configuration variants at
//! process start. The decision is a pure function of the deployment stage
//! and certificate presence; it is never re-evaluated without a restart,
//! so a bootstrap-to-TLS transition happens either through the watcher or
//! naturally on the next restart.

use certflow_config::DeploymentStage;

/// The proxy configuration variant to activate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Plain HTTP, no TLS, no ACME; the dev variant
    HttpOnly,
    /// HTTP serving the ACME challenge path while awaiting a certificate
    AcmeBootstrap,
    /// Full TLS with the stored certificate bundle
    TlsActive,
}

impl ConfigMode {
    /// Select the mode for this process lifetime
    ///
    /// | stage      | cert+key present | mode          |
    /// |------------|------------------|---------------|
    /// | dev        | —                | HttpOnly      |
    /// | production | yes              | TlsActive     |
    /// | production | no               | AcmeBootstrap |
    pub fn select(stage: DeploymentStage, cert_present: bool) -> Self {
        match (stage, cert_present) {
            (DeploymentStage::Dev, _) => ConfigMode::HttpOnly,
            (DeploymentStage::Production, true) => ConfigMode::TlsActive,
            (DeploymentStage::Production, false) => ConfigMode::AcmeBootstrap,
        }
    }

    /// Template file name for this variant
    pub fn template_file(self) -> &'static str {
        match self {
            ConfigMode::HttpOnly => "http_only.conf",
            ConfigMode::AcmeBootstrap => "acme_bootstrap.conf",
            ConfigMode::TlsActive => "tls_active.conf",
        }
    }

    /// Whether this variant must expose the ACME challenge path
    pub fn serves_challenges(self) -> bool {
        matches!(self, ConfigMode::AcmeBootstrap | ConfigMode::TlsActive)
    }
}

impl std::fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConfigMode::HttpOnly => "http-only",
            ConfigMode::AcmeBootstrap => "acme-bootstrap",
            ConfigMode::TlsActive => "tls-active",
        };
        f.write_str(name)
    }
}
