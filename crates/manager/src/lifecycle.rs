//! Certificate lifecycle state machine
//!
//! Runs the acquisition/renewal loop:
//!
//! ```text
//! NoCert -> Acquiring -> Valid -> (RenewalDue -> Renewing -> Valid) -> ...
//! ```
//!
//! Failures in `Acquiring`/`Renewing` return to the prior state and are
//! retried on the next scheduled tick, never immediately. The loop is
//! strictly sequential: one fixed-period tick, at most one in-flight
//! operation.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use certflow_common::{shutdown_signal, CertificateStore, StoreError};
use certflow_config::Settings;

use crate::acme::{self, AcmeClient, FailureClass};

/// Lifecycle manager states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No bundle exists in the store
    NoCert,
    /// Initial acquisition in flight
    Acquiring,
    /// A bundle exists outside the renewal threshold
    Valid,
    /// The bundle is within the renewal threshold
    RenewalDue,
    /// Renewal in flight
    Renewing,
}

/// Outcome of one scheduled tick, for observability only
///
/// Control flow never branches on whether a renewal was a real replacement
/// or a no-op; the distinction exists for the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No bundle existed and acquisition succeeded
    Acquired,
    /// Renewal ran and the stored bundle changed
    Renewed,
    /// Renewal ran but the client kept the existing bundle
    RenewalNoop,
    /// The bundle is valid and outside the threshold; nothing was invoked
    StillValid,
    /// Acquisition or renewal failed; deferred to the next tick
    Failed(FailureClass),
}

/// The certificate lifecycle manager
///
/// Owns acquisition and periodic renewal for one domain set. Writes reach
/// the shared store only through the external ACME client; this manager
/// does no partial writes itself.
pub struct LifecycleManager {
    store: Arc<dyn CertificateStore>,
    client: Arc<dyn AcmeClient>,
    domains: Vec<String>,
    threshold_days: u32,
    interval: Duration,
    startup_delay: Duration,
    state: LifecycleState,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn CertificateStore>,
        client: Arc<dyn AcmeClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            client,
            domains: settings.all_domains(),
            threshold_days: settings.validity_threshold_days,
            interval: settings.renewal_interval(),
            startup_delay: settings.startup_delay(),
            state: LifecycleState::NoCert,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Lifecycle state changed");
            self.state = next;
        }
    }

    /// Run one scheduled check
    ///
    /// # Errors
    ///
    /// Only store failures propagate; ACME failures are folded into
    /// [`TickOutcome::Failed`] and retried on the next tick.
    pub async fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        let primary = self.domains[0].clone();

        let Some(bundle) = self.store.load(&primary)? else {
            self.transition(LifecycleState::NoCert);
            info!(
                domains = ?self.domains,
                "No certificate bundle in store, attempting acquisition"
            );

            self.transition(LifecycleState::Acquiring);
            return match self.client.acquire(&self.domains).await {
                Ok(()) => {
                    self.transition(LifecycleState::Valid);
                    info!(domain = %primary, "Certificate acquired");
                    Ok(TickOutcome::Acquired)
                }
                Err(e) => {
                    self.transition(LifecycleState::NoCert);
                    acme::log_failure("Certificate acquisition", &e);
                    Ok(TickOutcome::Failed(e.class()))
                }
            };
        };

        if !bundle.needs_renewal(self.threshold_days) {
            self.transition(LifecycleState::Valid);
            debug!(
                domain = %primary,
                not_after = %bundle.not_after,
                "Certificate is still valid"
            );
            return Ok(TickOutcome::StillValid);
        }

        self.transition(LifecycleState::RenewalDue);
        info!(
            domain = %primary,
            not_after = %bundle.not_after,
            threshold_days = self.threshold_days,
            "Certificate is within the renewal threshold"
        );

        let before = self.store.modified_at(&primary)?;
        let tick_started = SystemTime::now();

        self.transition(LifecycleState::Renewing);
        match self.client.renew().await {
            Ok(()) => {
                self.transition(LifecycleState::Valid);
                let after = self.store.modified_at(&primary)?;

                // Did the tick produce a real replacement or a no-op?
                if after > before && after >= Some(tick_started) {
                    let renewed = self.store.load(&primary)?;
                    info!(
                        domain = %primary,
                        not_after = ?renewed.map(|b| b.not_after),
                        "Certificate renewed"
                    );
                    Ok(TickOutcome::Renewed)
                } else {
                    info!(domain = %primary, "Renewal check completed, bundle unchanged");
                    Ok(TickOutcome::RenewalNoop)
                }
            }
            Err(e) => {
                self.transition(LifecycleState::RenewalDue);
                acme::log_failure("Certificate renewal", &e);
                Ok(TickOutcome::Failed(e.class()))
            }
        }
    }

    /// Run the lifecycle loop until a termination signal
    ///
    /// Starts with a fixed delay so the proxy process can finish bringing up
    /// the listener that serves the challenge directory.
    pub async fn run(mut self) -> Result<(), StoreError> {
        info!(
            startup_delay_secs = self.startup_delay.as_secs(),
            check_interval_hours = self.interval.as_secs() / 3600,
            domains = ?self.domains,
            "Starting certificate lifecycle manager"
        );

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        tokio::select! {
            _ = tokio::time::sleep(self.startup_delay) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested before first check");
                return Ok(());
            }
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(outcome) => {
                            debug!(outcome = ?outcome, "Scheduled check finished");
                        }
                        // Permission failures must surface loudly; everything
                        // else waits for the next tick
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "Certificate store read failed, retrying at next check");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Stopping certificate lifecycle manager");
                    return Ok(());
                }
            }
        }
    }
}
