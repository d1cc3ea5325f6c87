//! Certflow Proxyctl Library
//!
//! The proxy-side half of Certflow. It never acquires certificates; it
//! reacts to what the lifecycle manager leaves in the shared store:
//!
//! - **Mode selection**: pick exactly one configuration variant at process
//!   start from the deployment stage and certificate presence
//! - **Rendering**: substitute deployment values into the variant's template
//!   and write the artifact the serving process reads
//! - **Watching**: poll for the certificate's first appearance, then follow
//!   change notifications
//! - **Reload coordination**: validate-then-swap the configuration and
//!   signal the serving process to reload gracefully

// ============================================================================
// Module Declarations
// ============================================================================

pub mod control;
pub mod mode;
pub mod reload;
pub mod render;
pub mod watcher;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use control::{CommandProxyControl, ControlError, ProxyControl};
pub use mode::ConfigMode;
pub use reload::{ActivationError, ReloadCoordinator};
pub use render::{RenderError, Renderer};
pub use watcher::{CertWatcher, WatchPhase};
