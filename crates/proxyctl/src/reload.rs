//! Validate-then-swap reload coordination
//!
//! Activates a configuration variant in the running serving process:
//! render a candidate, validate it, atomically swap it into place, then
//! signal a graceful reload. The active configuration is never edited in
//! place while live, and a failed validation leaves it untouched.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::{ControlError, ProxyControl};
use crate::mode::ConfigMode;
use crate::render::{write_atomic, RenderError, Renderer};

/// Errors from one activation attempt
///
/// All of these are recoverable: the previously active configuration keeps
/// serving and the next certificate event retries.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Candidate rejected by validation: {0}")]
    Validation(ControlError),

    #[error("Failed to swap configuration into place: {0}")]
    Swap(std::io::Error),

    #[error("Configuration swapped but reload signalling failed: {0}")]
    Reload(ControlError),
}

/// Coordinates safe activation of configuration variants
pub struct ReloadCoordinator {
    renderer: Renderer,
    control: Arc<dyn ProxyControl>,
    active_path: PathBuf,
    activations: AtomicUsize,
}

impl ReloadCoordinator {
    pub fn new(renderer: Renderer, control: Arc<dyn ProxyControl>, active_path: PathBuf) -> Self {
        Self {
            renderer,
            control,
            active_path,
            activations: AtomicUsize::new(0),
        }
    }

    /// Number of successful activations since process start
    pub fn activation_count(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }

    /// Render, validate, swap, and reload one configuration variant
    ///
    /// # Errors
    ///
    /// On validation failure the candidate is discarded and the active
    /// configuration remains untouched; no reload signal is sent.
    pub async fn activate(&self, mode: ConfigMode) -> Result<(), ActivationError> {
        let rendered = self.renderer.render(mode)?;

        let candidate = self.active_path.with_extension("conf.candidate");
        write_atomic(&candidate, &rendered).map_err(ActivationError::Swap)?;

        debug!(
            mode = %mode,
            candidate = %candidate.display(),
            "Validating candidate configuration"
        );

        if let Err(e) = self.control.validate(&candidate).await {
            // Best-effort cleanup; the candidate is inert either way
            let _ = std::fs::remove_file(&candidate);
            warn!(
                mode = %mode,
                error = %e,
                "Candidate configuration failed validation, keeping the \
                 active configuration"
            );
            return Err(ActivationError::Validation(e));
        }

        std::fs::rename(&candidate, &self.active_path).map_err(ActivationError::Swap)?;

        self.control
            .reload()
            .await
            .map_err(ActivationError::Reload)?;

        let total = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            mode = %mode,
            active = %self.active_path.display(),
            activations = total,
            "Configuration activated and serving process reloaded"
        );

        Ok(())
    }
}

impl std::fmt::Debug for ReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadCoordinator")
            .field("active_path", &self.active_path)
            .field("activations", &self.activation_count())
            .finish()
    }
}
