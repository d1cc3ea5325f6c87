//! Abstract certificate store
//!
//! The single coordination point between the lifecycle manager and the proxy
//! coordinator. The store is a directory contract:
//!
//! ```text
//! {root}/
//! └── {domain}/
//!     ├── fullchain.pem     # Certificate chain, leaf first
//!     └── privkey.pem       # Private key
//! ```
//!
//! The manager side writes bundles (via the external ACME client, or
//! [`CertificateStore::save`] directly); the proxy side only reads and
//! watches. Modelling the store as a trait keeps both processes testable
//! against [`MemoryStore`] instead of a real volume.

mod fs;
mod memory;

use std::path::PathBuf;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::bundle::{BundleError, CertificateBundle};

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Errors raised by certificate store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Permission problems are fatal to the calling process; orchestration
    /// tooling must see a loud failure, not silent partial operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Failed to watch certificate store: {0}")]
    Watch(String),
}

impl StoreError {
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            StoreError::PermissionDenied(path.to_path_buf())
        } else {
            StoreError::Io(err)
        }
    }

    /// Whether this error must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::PermissionDenied(_))
    }
}

/// Change notification from a store watch subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// The certificate chain was written or replaced
    Changed,
}

/// A live watch subscription on one domain's bundle
///
/// Holds the underlying filesystem watcher alive for as long as the
/// subscription exists; dropping it ends the watch.
pub struct BundleEvents {
    rx: mpsc::Receiver<StoreEvent>,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl BundleEvents {
    pub(crate) fn new(rx: mpsc::Receiver<StoreEvent>, watcher: Option<notify::RecommendedWatcher>) -> Self {
        Self { rx, _watcher: watcher }
    }

    /// Receive the next change event
    ///
    /// Returns `None` if the subscription is no longer being fed.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Drain any already-queued event without waiting
    pub fn try_recv(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for BundleEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleEvents")
            .field("has_fs_watcher", &self._watcher.is_some())
            .finish()
    }
}

/// Read / write / watch access to stored certificate bundles
///
/// Implementations must tolerate concurrent readers; the write side is a
/// single sequential process by design.
pub trait CertificateStore: Send + Sync {
    /// Load and parse the bundle for a domain
    ///
    /// Returns `Ok(None)` if no certificate chain exists yet.
    fn load(&self, domain: &str) -> Result<Option<CertificateBundle>, StoreError>;

    /// Whether both the certificate chain and the private key are present
    fn is_present(&self, domain: &str) -> bool;

    /// Modification time of the certificate chain, if present
    fn modified_at(&self, domain: &str) -> Result<Option<SystemTime>, StoreError>;

    /// Write a bundle, atomically replacing any previous one
    fn save(&self, domain: &str, cert_pem: &str, key_pem: &str) -> Result<(), StoreError>;

    /// Subscribe to change notifications for a domain's certificate chain
    ///
    /// The domain's bundle must already exist; callers poll
    /// [`CertificateStore::is_present`] first to resolve the cold-start race.
    fn subscribe(&self, domain: &str) -> Result<BundleEvents, StoreError>;
}
