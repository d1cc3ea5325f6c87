//! Termination signal handling.
//!
//! Both Certflow processes stop their loops on SIGTERM/SIGINT and exit
//! without leaving partial state; neither handles SIGHUP, reload is driven
//! by the watcher, not by signals to these processes.

use tracing::info;

/// Wait until a termination signal is delivered
///
/// Resolves on SIGTERM or SIGINT (Ctrl-C). Callers race this against their
/// main loop with `tokio::select!`.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut int =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = term.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = int.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C, initiating graceful shutdown");
    }
}
