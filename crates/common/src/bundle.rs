//! Certificate bundle model
//!
//! A bundle is the certificate chain + private key pair for one domain,
//! stored as `fullchain.pem` / `privkey.pem` in the shared store. The
//! validity window is parsed from the leaf certificate of the chain, never
//! persisted separately, so the files themselves stay the single source of
//! truth.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::trace;

/// Certificate chain file name within a domain directory
pub const FULLCHAIN_FILE: &str = "fullchain.pem";

/// Private key file name within a domain directory
pub const PRIVKEY_FILE: &str = "privkey.pem";

/// Errors raised while loading or parsing a certificate bundle
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No PEM blocks found in {0}")]
    EmptyChain(PathBuf),

    #[error("Invalid PEM in {path}: {reason}")]
    InvalidPem { path: PathBuf, reason: String },

    #[error("Invalid X509 certificate in {path}: {reason}")]
    InvalidCertificate { path: PathBuf, reason: String },

    #[error("Certificate validity timestamp out of range in {0}")]
    InvalidValidity(PathBuf),
}

/// A certificate bundle for one domain
///
/// Created by parsing the stored chain; the leaf certificate (first PEM
/// block of `fullchain.pem`) provides the validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Primary domain the bundle covers
    pub domain: String,
    /// Path to the certificate chain
    pub cert_path: PathBuf,
    /// Path to the private key
    pub key_path: PathBuf,
    /// Start of the validity window
    pub not_before: DateTime<Utc>,
    /// End of the validity window
    pub not_after: DateTime<Utc>,
}

impl CertificateBundle {
    /// Load a bundle by parsing the certificate chain on disk
    ///
    /// # Errors
    ///
    /// Returns an error if the chain cannot be read, contains no PEM blocks,
    /// or the leaf certificate is not valid X509.
    pub fn load(domain: &str, cert_path: &Path, key_path: &Path) -> Result<Self, BundleError> {
        let chain = fs::read(cert_path)?;
        let (not_before, not_after) = parse_validity(cert_path, &chain)?;

        trace!(
            domain = %domain,
            not_before = %not_before,
            not_after = %not_after,
            "Parsed certificate bundle"
        );

        Ok(Self {
            domain: domain.to_string(),
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            not_before,
            not_after,
        })
    }

    /// Time remaining until the certificate expires
    ///
    /// Negative once the certificate has expired.
    pub fn time_until_expiry(&self) -> Duration {
        self.not_after - Utc::now()
    }

    /// Renewal decision: does the certificate expire within the threshold?
    ///
    /// Recomputed on every check, never cached.
    pub fn needs_renewal(&self, renew_before_days: u32) -> bool {
        self.time_until_expiry() < Duration::days(i64::from(renew_before_days))
    }
}

/// Parse the validity window from the leaf certificate of a PEM chain
pub fn parse_validity(
    path: &Path,
    chain: &[u8],
) -> Result<(DateTime<Utc>, DateTime<Utc>), BundleError> {
    let blocks = pem::parse_many(chain).map_err(|e| BundleError::InvalidPem {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // The leaf comes first in a fullchain file
    let leaf = blocks
        .first()
        .ok_or_else(|| BundleError::EmptyChain(path.to_path_buf()))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents()).map_err(|e| {
        BundleError::InvalidCertificate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    let not_before = DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .ok_or_else(|| BundleError::InvalidValidity(path.to_path_buf()))?;
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| BundleError::InvalidValidity(path.to_path_buf()))?;

    Ok((not_before, not_after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn mint_chain(domain: &str, not_after: time::OffsetDateTime) -> String {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
        params.not_after = not_after;
        let key = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    fn write_chain(dir: &TempDir, pem: &str) -> PathBuf {
        let path = dir.path().join(FULLCHAIN_FILE);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(pem.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_parses_validity_window() {
        let dir = TempDir::new().unwrap();
        let expiry = time::OffsetDateTime::now_utc() + time::Duration::days(90);
        let path = write_chain(&dir, &mint_chain("example.com", expiry));

        let bundle =
            CertificateBundle::load("example.com", &path, &dir.path().join(PRIVKEY_FILE)).unwrap();

        assert_eq!(bundle.domain, "example.com");
        assert!(bundle.not_before < bundle.not_after);
        let days_left = bundle.time_until_expiry().num_days();
        assert!((88..=90).contains(&days_left), "days_left = {days_left}");
    }

    #[test]
    fn test_needs_renewal_below_threshold() {
        let dir = TempDir::new().unwrap();
        let expiry = time::OffsetDateTime::now_utc() + time::Duration::days(29);
        let path = write_chain(&dir, &mint_chain("example.com", expiry));

        let bundle =
            CertificateBundle::load("example.com", &path, &dir.path().join(PRIVKEY_FILE)).unwrap();

        assert!(bundle.needs_renewal(30));
    }

    #[test]
    fn test_needs_renewal_above_threshold() {
        let dir = TempDir::new().unwrap();
        let expiry = time::OffsetDateTime::now_utc() + time::Duration::days(31);
        let path = write_chain(&dir, &mint_chain("example.com", expiry));

        let bundle =
            CertificateBundle::load("example.com", &path, &dir.path().join(PRIVKEY_FILE)).unwrap();

        assert!(!bundle.needs_renewal(30));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = CertificateBundle::load(
            "example.com",
            &dir.path().join(FULLCHAIN_FILE),
            &dir.path().join(PRIVKEY_FILE),
        );
        assert!(matches!(result, Err(BundleError::Io(_))));
    }

    #[test]
    fn test_load_garbage_pem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FULLCHAIN_FILE);
        fs::write(&path, "not a certificate").unwrap();

        let result =
            CertificateBundle::load("example.com", &path, &dir.path().join(PRIVKEY_FILE));
        assert!(result.is_err());
    }
}
