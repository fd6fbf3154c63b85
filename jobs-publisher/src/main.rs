//! Jobs Supervisor - provisions dead-letter topology and keeps the broker
//! connection healthy.
//!
//! On startup it declares the dead-letter exchanges and queues (fatal if the
//! broker is unreachable), then periodically reconnects whenever the
//! connection has dropped, until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobs::{AmqpConnector, Config, ConnectionManager, InfrastructureInitializer};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("supervisor_starting");

    // Load configuration from environment
    let config = Arc::new(Config::from_env());
    info!(
        jobs_enabled = config.jobs_enabled,
        broker_url = %config.redacted_broker_url(),
        channel_pool_size = config.channel_pool_size,
        default_fallback = %config.default_fallback,
        mail_relay_configured = config.mail_api_url.is_some(),
        "config_loaded"
    );

    if !config.jobs_enabled {
        info!("supervisor_jobs_disabled");
        return Ok(());
    }

    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&config),
        Arc::new(AmqpConnector),
    ));

    InfrastructureInitializer::new(Arc::clone(&manager))
        .execute()
        .await
        .context("Failed to provision dead-letter infrastructure")?;

    info!("supervisor_ready");

    manager
        .supervise(
            Duration::from_secs(config.health_check_interval_secs.max(1)),
            shutdown_signal(),
        )
        .await;

    manager.disconnect().await;

    info!("supervisor_shutdown_complete");
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
