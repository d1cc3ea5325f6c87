//! In-memory certificate store
//!
//! Test double for the filesystem store. Holds parsed bundles and a
//! synthetic modification clock, and feeds watch subscriptions directly,
//! so coordinator logic can be exercised without a real volume or
//! platform file watcher.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::bundle::{parse_validity, CertificateBundle, FULLCHAIN_FILE, PRIVKEY_FILE};

use super::{BundleEvents, CertificateStore, StoreError, StoreEvent};

struct Entry {
    bundle: CertificateBundle,
    modified: SystemTime,
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<StoreEvent>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built bundle, as if the ACME client had written it
    pub fn insert(&self, domain: &str, bundle: CertificateBundle) {
        self.entries.lock().insert(
            domain.to_string(),
            Entry {
                bundle,
                modified: SystemTime::now(),
            },
        );
        self.notify(domain);
    }

    /// Bump a bundle's modification time without changing its content
    ///
    /// Simulates a write-close event on the chain file.
    pub fn touch(&self, domain: &str) {
        if let Some(entry) = self.entries.lock().get_mut(domain) {
            // Strictly later even on coarse clocks
            entry.modified = entry.modified.max(SystemTime::now()) + Duration::from_nanos(1);
        }
        self.notify(domain);
    }

    fn notify(&self, domain: &str) {
        if let Some(senders) = self.subscribers.lock().get_mut(domain) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                let _ = tx.try_send(StoreEvent::Changed);
            }
        }
    }
}

impl CertificateStore for MemoryStore {
    fn load(&self, domain: &str) -> Result<Option<CertificateBundle>, StoreError> {
        Ok(self.entries.lock().get(domain).map(|e| e.bundle.clone()))
    }

    fn is_present(&self, domain: &str) -> bool {
        self.entries.lock().contains_key(domain)
    }

    fn modified_at(&self, domain: &str) -> Result<Option<SystemTime>, StoreError> {
        Ok(self.entries.lock().get(domain).map(|e| e.modified))
    }

    fn save(&self, domain: &str, cert_pem: &str, _key_pem: &str) -> Result<(), StoreError> {
        let dir = PathBuf::from("/memory").join(domain);
        let (not_before, not_after) =
            parse_validity(&dir.join(FULLCHAIN_FILE), cert_pem.as_bytes())?;

        trace!(domain = %domain, not_after = %not_after, "Saved in-memory bundle");

        self.insert(
            domain,
            CertificateBundle {
                domain: domain.to_string(),
                cert_path: dir.join(FULLCHAIN_FILE),
                key_path: dir.join(PRIVKEY_FILE),
                not_before,
                not_after,
            },
        );
        Ok(())
    }

    fn subscribe(&self, domain: &str) -> Result<BundleEvents, StoreError> {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers
            .lock()
            .entry(domain.to_string())
            .or_default()
            .push(tx);
        Ok(BundleEvents::new(rx, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn bundle(domain: &str, days_left: i64) -> CertificateBundle {
        let now = Utc::now();
        CertificateBundle {
            domain: domain.to_string(),
            cert_path: PathBuf::from("/memory").join(domain).join(FULLCHAIN_FILE),
            key_path: PathBuf::from("/memory").join(domain).join(PRIVKEY_FILE),
            not_before: now - ChronoDuration::days(1),
            not_after: now + ChronoDuration::days(days_left),
        }
    }

    #[test]
    fn test_insert_and_load() {
        let store = MemoryStore::new();
        assert!(!store.is_present("example.com"));

        store.insert("example.com", bundle("example.com", 60));

        assert!(store.is_present("example.com"));
        let loaded = store.load("example.com").unwrap().unwrap();
        assert!(!loaded.needs_renewal(30));
    }

    #[test]
    fn test_touch_bumps_modification_time() {
        let store = MemoryStore::new();
        store.insert("example.com", bundle("example.com", 60));

        let before = store.modified_at("example.com").unwrap().unwrap();
        store.touch("example.com");
        let after = store.modified_at("example.com").unwrap().unwrap();

        assert!(after > before);
    }

    #[tokio::test]
    async fn test_subscription_receives_touch() {
        let store = MemoryStore::new();
        store.insert("example.com", bundle("example.com", 60));

        let mut events = store.subscribe("example.com").unwrap();
        store.touch("example.com");

        assert_eq!(events.recv().await, Some(StoreEvent::Changed));
    }
}
