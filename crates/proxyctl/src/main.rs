//! Certflow Proxyctl - Main entry point
//!
//! The proxy-side process: selects and renders the configuration variant at
//! startup, then watches the shared certificate store and coordinates
//! graceful reloads of the serving process.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use certflow_common::{shutdown_signal, CertificateStore, FsStore};
use certflow_config::Settings;
use certflow_proxyctl::{
    CertWatcher, CommandProxyControl, ConfigMode, ReloadCoordinator, Renderer,
};

/// Certflow proxy-side mode selection and certificate watcher
#[derive(Parser, Debug)]
#[command(name = "certflow-proxyctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Select and render the configuration variant, then exit
    Select,
    /// Select, render, and run the certificate watcher (default)
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let settings = Settings::from_env().context("Failed to load environment configuration")?;
    settings.validate().context("Invalid configuration")?;

    let store = FsStore::new(&settings.cert_root);

    // Mode selection happens exactly once per process lifetime
    let mode = ConfigMode::select(settings.stage, store.is_present(&settings.domain));
    info!(
        mode = %mode,
        stage = ?settings.stage,
        domain = %settings.domain,
        "Selected configuration mode"
    );

    let renderer = Renderer::from_settings(&settings);
    renderer
        .render_to(mode, &settings.active_config)
        .context("Failed to render configuration variant")?;
    info!(
        active = %settings.active_config.display(),
        "Configuration artifact written"
    );

    if matches!(cli.command, Some(Commands::Select)) {
        return Ok(());
    }

    if !settings.stage.is_production() {
        // Dev never transitions to TLS; nothing to watch
        info!("Dev stage, certificate watcher not needed");
        shutdown_signal().await;
        return Ok(());
    }

    let control = Arc::new(CommandProxyControl::new(
        settings.validate_command.clone(),
        settings.reload_command.clone(),
        settings.control_timeout(),
    ));
    let coordinator = Arc::new(ReloadCoordinator::new(
        renderer,
        control,
        settings.active_config.clone(),
    ));

    let initial_modified = store
        .modified_at(&settings.domain)
        .context("Failed to read certificate store")?;

    let watcher = CertWatcher::new(
        Arc::new(store),
        coordinator,
        settings.domain.clone(),
        settings.poll_interval(),
        settings.debounce(),
        initial_modified,
    );

    tokio::select! {
        result = watcher.run() => {
            // Only fatal store failures end the watch loop
            result.context("Certificate watcher failed")?;
        }
        _ = shutdown_signal() => {}
    }

    info!("certflow-proxyctl stopped");
    Ok(())
}
