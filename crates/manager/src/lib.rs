//! Certflow Manager Library
//!
//! The certificate lifecycle side of Certflow: guarantees a valid,
//! non-expiring certificate bundle exists in the shared store for the
//! configured domain set, using only idempotent, retryable operations
//! against an external ACME client.
//!
//! The manager never talks to the proxy process. Its only output is the
//! bundle it writes (through the ACME client) into the shared certificate
//! store; the proxy side discovers changes by watching that store.

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod lifecycle;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use acme::{AcmeClient, AcmeError, CommandAcmeClient, FailureClass};
pub use lifecycle::{LifecycleManager, LifecycleState, TickOutcome};
