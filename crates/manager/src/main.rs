//! Certflow Manager - Main entry point
//!
//! The certificate lifecycle process: acquires and renews the TLS
//! certificate bundle for the configured domain set through an external
//! ACME client, writing into the shared certificate store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use certflow_common::{CertificateStore, FsStore};
use certflow_config::Settings;
use certflow_manager::{CommandAcmeClient, LifecycleManager};

/// Certflow certificate lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "certflow-manager")]
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
    /// Print bundle status and the current renewal decision, then exit
    Check,
    /// Run the lifecycle loop (default)
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

    match cli.command {
        Some(Commands::Check) => check(&settings),
        _ => run(settings).await,
    }
}

/// Report bundle status without any network calls
///
/// Exits zero when a bundle exists and is outside the renewal threshold.
fn check(settings: &Settings) -> Result<()> {
    settings.validate().context("Invalid configuration")?;

    let store = FsStore::new(&settings.cert_root);
    match store
        .load(&settings.domain)
        .context("Failed to read certificate store")?
    {
        Some(bundle) => {
            let days_left = bundle.time_until_expiry().num_days();
            println!(
                "certflow-manager: bundle for {} expires {} ({} days left)",
                bundle.domain, bundle.not_after, days_left
            );
            if bundle.needs_renewal(settings.validity_threshold_days) {
                println!(
                    "certflow-manager: renewal due (threshold {} days)",
                    settings.validity_threshold_days
                );
                std::process::exit(1);
            }
            println!("certflow-manager: certificate is valid, no renewal due");
            Ok(())
        }
        None => {
            println!(
                "certflow-manager: no bundle for {} under {}",
                settings.domain,
                settings.cert_root.display()
            );
            std::process::exit(1);
        }
    }
}

/// Run the lifecycle loop until a termination signal
async fn run(settings: Settings) -> Result<()> {
    settings
        .validate_manager()
        .context("Invalid configuration")?;

    info!(
        domain = %settings.domain,
        stage = ?settings.stage,
        acme_staging = settings.acme_staging,
        cert_root = %settings.cert_root.display(),
        "Starting certflow-manager"
    );

    let store: Arc<dyn CertificateStore> = Arc::new(FsStore::new(&settings.cert_root));
    let client = Arc::new(CommandAcmeClient::new(&settings));

    let manager = LifecycleManager::new(store, client, &settings);
    if let Err(e) = manager.run().await {
        // Store failures reaching this point are fatal (permissions);
        // orchestration tooling must see a non-zero exit
        error!(error = %e, "Certificate store failure, exiting");
        return Err(e).context("Certificate store failure");
    }

    info!("certflow-manager stopped");
    Ok(())
}
