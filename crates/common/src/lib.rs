//! Certflow Common
//!
//! Shared building blocks for the two Certflow processes: the certificate
//! lifecycle manager and the proxy reconfiguration coordinator.
//!
//! The two processes never talk to each other directly. Everything they
//! exchange goes through a [`CertificateStore`]: a durable directory tree of
//! certificate bundles, written by the manager side and read/watched by the
//! proxy side. This crate owns that contract:
//!
//! - **Bundle model**: [`CertificateBundle`] with its validity window parsed
//!   from the on-disk certificate chain
//! - **Store abstraction**: read / write / watch over bundles, with a
//!   filesystem implementation ([`FsStore`]) and an in-memory implementation
//!   ([`MemoryStore`]) for tests
//! - **Shutdown**: termination-signal helper shared by both binaries

// ============================================================================
// Module Declarations
// ============================================================================

pub mod bundle;
pub mod shutdown;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use bundle::{BundleError, CertificateBundle, FULLCHAIN_FILE, PRIVKEY_FILE};
pub use shutdown::shutdown_signal;
pub use store::{BundleEvents, CertificateStore, FsStore, MemoryStore, StoreError, StoreEvent};

/// HTTP-01 challenge path prefix
///
/// The proxy must serve unauthenticated static content under this path in
/// every configuration variant that can face the ACME server.
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";
