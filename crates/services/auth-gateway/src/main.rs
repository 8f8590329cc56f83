//! Auth Gateway Binary
//!
//! Entry point for the stream authorization gateway.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remotemedia_auth_gateway::{
    api::{build_router, AppState},
    config::Config,
    control::{HttpControlPlane, RevocationController},
    service::{AuthService, TaskIntervals},
    store::{check_schema, SqliteStore},
};

/// MediaMTX stream authorization gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file, or a directory of `*.toml` files merged in name order
    #[arg(short = 'c', long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    tracing::info!("Starting auth gateway...");

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let config = Arc::new(config);

    tracing::info!(
        "Configuration: bind={}:{}, db={}, cache={}s, poll={}s",
        config.server.host,
        config.server.port,
        config.database.path,
        config.database.cache_duration_seconds,
        config.database.poll_interval_seconds
    );

    // Open the grant database and refuse to run against an old schema
    let store = Arc::new(
        SqliteStore::open(&config.database.path, config.database.query_timeout())
            .with_context(|| format!("opening database {}", config.database.path))?,
    );
    check_schema(store.as_ref())
        .await
        .context("checking database schema")?;

    // Control plane
    let client = Arc::new(HttpControlPlane::new(config.control_plane.timeout())?);
    let controller = Arc::new(RevocationController::new(
        &config.control_plane.primary_url,
        &config.control_plane.publish_url,
        client,
    )?);

    let service = Arc::new(AuthService::new(
        store,
        controller,
        config.database.cache_duration(),
        config.database.connection_track(),
    ));

    // Create shutdown signal channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Spawn the expiry sweepers and the grant poller
    let task_handles = service.spawn_background_tasks(
        TaskIntervals {
            sweep: config.database.sweep_interval(),
            poll: config.database.poll_interval(),
        },
        &shutdown_tx,
    );

    // Build HTTP router
    let state = AppState::new(service, config.clone())?;
    let router = build_router(state);

    // Start HTTP server
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("HTTP server listening on {}", bind_addr);

    // Run the HTTP server with graceful shutdown on SIGTERM/SIGINT
    let shutdown_tx_clone = shutdown_tx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, initiating graceful shutdown...");
            let _ = shutdown_tx_clone.send(());
        })
        .await?;

    // Signal shutdown to all background tasks
    let _ = shutdown_tx.send(());

    // Wait for background tasks to complete
    for handle in task_handles {
        let _ = handle.await;
    }

    tracing::info!("Auth gateway shutdown complete");
    Ok(())
}

/// `RUST_LOG` filter; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").map_or(false, |format| format == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["auth-gateway", "-c", "/etc/auth-gateway"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/auth-gateway"));

        let args = Args::try_parse_from(["auth-gateway", "--config=gateway.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("gateway.toml"));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["auth-gateway", "--bogus"]).is_err());
    }
}
