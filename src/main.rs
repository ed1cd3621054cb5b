//! Stagecast telemetry forwarder.
//!
//! Reads newline-delimited stage events on stdin and delivers them to the
//! configured collector. SIGHUP reloads the delivery settings; SIGINT or
//! SIGTERM stops ingestion and drains in-flight deliveries.

mod config;
mod ingest;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use stagecast_core::SharedSettings;
use stagecast_delivery::DeliveryService;
use tracing::{info, warn};

use crate::config::{Config, CONFIG_FILE};

/// Lines buffered between the stdin thread and the runtime.
const STDIN_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config_path =
        std::env::args_os().nth(1).map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);

    info!(path = %config_path.display(), "Starting stagecast");

    let config = Config::load_from(&config_path)?;
    for issue in config.validate()? {
        warn!(field = issue.field, "{}", issue.message);
    }

    let delivery = config.to_delivery_settings();
    info!(
        enabled = delivery.is_enabled(),
        endpoint = delivery.endpoint().unwrap_or("<none>"),
        authenticated = delivery.token().is_some(),
        max_queue_size = delivery.max_queue_size,
        max_retries = delivery.max_retries,
        "Configuration loaded"
    );

    let service_config = config.to_service_config();
    let poll_interval = service_config.poll_interval;
    let settings = SharedSettings::new(delivery);
    let service = DeliveryService::with_http(Arc::new(settings.clone()), service_config);
    service.start().await;

    #[cfg(unix)]
    spawn_reload_on_sighup(config_path, settings)?;

    let lines = ingest::spawn_stdin_reader(STDIN_BUFFER).context("Failed to start stdin reader")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    tokio::select! {
        summary = ingest::forward(lines, &service) => {
            info!(
                accepted = summary.accepted,
                refused = summary.refused,
                malformed = summary.malformed,
                "Input closed, waiting for deliveries to settle"
            );
            tokio::select! {
                () = ingest::wait_until_settled(&service, poll_interval) => {},
                () = &mut shutdown => {
                    info!("Shutdown signal received while settling");
                },
            }
        },
        () = &mut shutdown => {
            info!("Shutdown signal received, starting graceful shutdown");
        },
    }

    let report = service.stop().await;
    let stats = service.stats();
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        abandoned = stats.abandoned,
        rejected = stats.rejected,
        aborted_tasks = report.aborted,
        "Stagecast shutdown complete"
    );

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,stagecast=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    // stdout stays free; logs go to stderr next to the event stream
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}

/// Re-reads the configuration file on every SIGHUP.
///
/// Invalid reloads are logged and the previous settings stay in effect.
#[cfg(unix)]
fn spawn_reload_on_sighup(path: PathBuf, settings: SharedSettings) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match Config::load_from(&path) {
                Ok(config) => {
                    let reloaded = config.to_delivery_settings();
                    info!(
                        enabled = reloaded.is_enabled(),
                        endpoint = reloaded.endpoint().unwrap_or("<none>"),
                        "Delivery settings reloaded"
                    );
                    settings.replace(reloaded);
                },
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Ignoring invalid configuration reload");
                },
            }
        }
    });

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
