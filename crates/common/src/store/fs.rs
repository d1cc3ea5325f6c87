//! Filesystem certificate store
//!
//! The production store: a shared volume following the
//! `{root}/{domain}/{fullchain.pem, privkey.pem}` contract. Writes are
//! temp-file + rename so readers never observe a torn bundle; change
//! notifications come from the platform file watcher.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::bundle::{CertificateBundle, FULLCHAIN_FILE, PRIVKEY_FILE};

use super::{BundleEvents, CertificateStore, StoreError, StoreEvent};

/// Buffered events per subscription; bursts beyond this are dropped, which
/// is harmless because consumers coalesce events anyway.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Filesystem-backed certificate store
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store over the given root directory
    ///
    /// The root is an injected deployment value (a shared volume), never a
    /// hard-coded constant.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "Using filesystem certificate store");
        Self { root }
    }

    /// Directory holding one domain's bundle
    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain)
    }

    /// Path to a domain's certificate chain
    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join(FULLCHAIN_FILE)
    }

    /// Path to a domain's private key
    pub fn key_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join(PRIVKEY_FILE)
    }

    fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
        let tmp = path.with_extension("pem.tmp");
        fs::write(&tmp, content).map_err(|e| StoreError::from_io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::from_io(path, e))?;
        Ok(())
    }
}

impl CertificateStore for FsStore {
    fn load(&self, domain: &str) -> Result<Option<CertificateBundle>, StoreError> {
        let cert_path = self.cert_path(domain);
        if !cert_path.exists() {
            trace!(domain = %domain, "No stored certificate found");
            return Ok(None);
        }

        let bundle = CertificateBundle::load(domain, &cert_path, &self.key_path(domain))?;
        Ok(Some(bundle))
    }

    fn is_present(&self, domain: &str) -> bool {
        self.cert_path(domain).exists() && self.key_path(domain).exists()
    }

    fn modified_at(&self, domain: &str) -> Result<Option<SystemTime>, StoreError> {
        let cert_path = self.cert_path(domain);
        match fs::metadata(&cert_path) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from_io(&cert_path, e)),
        }
    }

    fn save(&self, domain: &str, cert_pem: &str, key_pem: &str) -> Result<(), StoreError> {
        let dir = self.domain_dir(domain);
        fs::create_dir_all(&dir).map_err(|e| StoreError::from_io(&dir, e))?;

        let key_path = self.key_path(domain);
        Self::write_atomic(&key_path, key_pem)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::from_io(&key_path, e))?;
        }

        // Chain last: its appearance is the signal watchers react to
        Self::write_atomic(&self.cert_path(domain), cert_pem)?;

        info!(domain = %domain, "Saved certificate bundle to store");
        Ok(())
    }

    fn subscribe(&self, domain: &str) -> Result<BundleEvents, StoreError> {
        let dir = self.domain_dir(domain);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if is_chain_change(&event) {
                        // Dropped events are fine, consumers coalesce
                        let _ = tx.try_send(StoreEvent::Changed);
                    }
                }
                Err(e) => warn!(error = %e, "Certificate watch error"),
            }
        })
        .map_err(|e| StoreError::Watch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Watch(e.to_string()))?;

        debug!(
            domain = %domain,
            dir = %dir.display(),
            "Subscribed to certificate change notifications"
        );

        Ok(BundleEvents::new(rx, Some(watcher)))
    }
}

/// Whether a filesystem event touches the certificate chain
///
/// Write-close and move-into-place both surface as modify/create kinds
/// depending on the platform backend.
fn is_chain_change(event: &Event) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name().is_some_and(|n| n == FULLCHAIN_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mint_chain(domain: &str, days: i64) -> (String, String) {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(days);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_load_absent_bundle() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        assert!(store.load("example.com").unwrap().is_none());
        assert!(!store.is_present("example.com"));
        assert!(store.modified_at("example.com").unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let (cert, key) = mint_chain("example.com", 90);

        store.save("example.com", &cert, &key).unwrap();

        assert!(store.is_present("example.com"));
        let bundle = store.load("example.com").unwrap().unwrap();
        assert_eq!(bundle.domain, "example.com");
        assert!(!bundle.needs_renewal(30));
        assert!(store.modified_at("example.com").unwrap().is_some());
    }

    #[test]
    fn test_save_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        let (cert, key) = mint_chain("example.com", 20);
        store.save("example.com", &cert, &key).unwrap();
        let first = store.load("example.com").unwrap().unwrap();
        assert!(first.needs_renewal(30));

        let (cert, key) = mint_chain("example.com", 90);
        store.save("example.com", &cert, &key).unwrap();
        let second = store.load("example.com").unwrap().unwrap();

        assert!(!second.needs_renewal(30));
        assert!(second.not_after > first.not_after);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let (cert, key) = mint_chain("example.com", 90);
        store.save("example.com", &cert, &key).unwrap();

        let mode = fs::metadata(store.key_path("example.com"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_subscribe_sees_chain_replacement() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let (cert, key) = mint_chain("example.com", 20);
        store.save("example.com", &cert, &key).unwrap();

        let mut events = store.subscribe("example.com").unwrap();

        let (cert, key) = mint_chain("example.com", 90);
        store.save("example.com", &cert, &key).unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("watcher did not observe the renewal");
        assert_eq!(event, Some(StoreEvent::Changed));
    }
}
