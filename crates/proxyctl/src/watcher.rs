//! Certificate change watcher
//!
//! Detects that the lifecycle manager produced a new or renewed bundle and
//! activates it in the running serving process. Explicit two-phase state
//! machine:
//!
//! - `AwaitingFirstCert`: the bundle does not exist yet (the cold-start
//!   race: this process may start long before the manager produces
//!   anything). Poll for existence on a fixed interval.
//! - `Watching`: the bundle exists; follow change notifications from the
//!   store and activate on every real content change.
//!
//! Runs as a background task for the whole process lifetime; a termination
//! signal stops it along with the process.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, trace, warn};

use certflow_common::{CertificateStore, StoreError, StoreEvent};

use crate::mode::ConfigMode;
use crate::reload::ReloadCoordinator;

/// Watcher phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// Polling for the certificate's first appearance
    AwaitingFirstCert,
    /// Following change notifications
    Watching,
}

/// Last observed modification time; reset only on process restart
#[derive(Debug, Default)]
struct WatchState {
    last_modified: Option<SystemTime>,
}

impl WatchState {
    fn is_new(&self, mtime: SystemTime) -> bool {
        self.last_modified.is_none_or(|prev| mtime > prev)
    }

    fn observe(&mut self, mtime: SystemTime) {
        self.last_modified = Some(mtime);
    }
}

/// Watches one domain's bundle and coordinates reloads
pub struct CertWatcher {
    store: Arc<dyn CertificateStore>,
    coordinator: Arc<ReloadCoordinator>,
    domain: String,
    poll_interval: Duration,
    debounce: Duration,
    phase: WatchPhase,
    state: WatchState,
}

impl CertWatcher {
    /// Create a watcher
    ///
    /// `initial_modified` seeds the watch state with the bundle's
    /// modification time as of mode selection, so a process that started
    /// with TLS already active does not re-activate the same bundle.
    pub fn new(
        store: Arc<dyn CertificateStore>,
        coordinator: Arc<ReloadCoordinator>,
        domain: impl Into<String>,
        poll_interval: Duration,
        debounce: Duration,
        initial_modified: Option<SystemTime>,
    ) -> Self {
        Self {
            store,
            coordinator,
            domain: domain.into(),
            poll_interval,
            debounce,
            phase: WatchPhase::AwaitingFirstCert,
            state: WatchState {
                last_modified: initial_modified,
            },
        }
    }

    /// Run the watch loop indefinitely
    ///
    /// # Errors
    ///
    /// Only fatal store failures (permissions) end the loop; everything
    /// else is logged and retried.
    pub async fn run(mut self) -> Result<(), StoreError> {
        info!(
            domain = %self.domain,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Starting certificate change watcher"
        );

        loop {
            self.transition(WatchPhase::AwaitingFirstCert);
            self.await_first_cert().await;

            let mut events = match self.store.subscribe(&self.domain) {
                Ok(events) => events,
                Err(e) => {
                    warn!(
                        domain = %self.domain,
                        error = %e,
                        "Failed to subscribe to certificate changes, retrying"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            self.transition(WatchPhase::Watching);

            // Catch anything written between the existence check and the
            // subscription, including the first appearance itself
            self.check_and_activate().await?;

            while let Some(StoreEvent::Changed) = events.recv().await {
                // Let the write settle, then fold the burst into one check
                tokio::time::sleep(self.debounce).await;
                while events.try_recv().is_some() {}

                self.check_and_activate().await?;
            }

            warn!(
                domain = %self.domain,
                "Certificate change subscription ended, falling back to polling"
            );
        }
    }

    fn transition(&mut self, next: WatchPhase) {
        if self.phase != next {
            debug!(from = ?self.phase, to = ?next, "Watcher phase changed");
            self.phase = next;
        }
    }

    /// Poll until both bundle files exist
    async fn await_first_cert(&self) {
        if self.store.is_present(&self.domain) {
            return;
        }

        info!(
            domain = %self.domain,
            poll_interval_secs = self.poll_interval.as_secs(),
            "No certificate bundle yet, polling for first appearance"
        );

        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.store.is_present(&self.domain) {
                info!(domain = %self.domain, "Certificate bundle appeared");
                return;
            }
            trace!(domain = %self.domain, "Certificate bundle still absent");
        }
    }

    /// Activate the TLS variant if the bundle actually changed
    ///
    /// The modification-time guard makes one renewal produce exactly one
    /// reload, however many filesystem events the write emitted.
    async fn check_and_activate(&mut self) -> Result<(), StoreError> {
        let mtime = match self.store.modified_at(&self.domain) {
            Ok(Some(mtime)) => mtime,
            Ok(None) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(domain = %self.domain, error = %e, "Failed to stat certificate bundle");
                return Ok(());
            }
        };

        if !self.state.is_new(mtime) {
            trace!(
                domain = %self.domain,
                "Bundle modification time unchanged, suppressing duplicate event"
            );
            return Ok(());
        }

        info!(domain = %self.domain, "Certificate bundle changed, activating");
        match self.coordinator.activate(ConfigMode::TlsActive).await {
            Ok(()) => self.state.observe(mtime),
            // The active configuration keeps serving; the watch state is
            // left as-is so the next change event retries
            Err(e) => warn!(
                domain = %self.domain,
                error = %e,
                "Activation failed, active configuration unchanged"
            ),
        }

        Ok(())
    }
}
