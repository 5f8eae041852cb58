//! Bloom Server - Main entry point

use anyhow::Result;
use bloom_common::logging::{init_logging, LogConfig};
use bloom_ingest::store::open_store;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{error, info};

use bloom_server::{
    config::Config, router, shutdown::serve_until, supervisor::ProcessSupervisor, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("bloom-server")
        .filter_directives("bloom_server=debug,tower_http=debug")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env_or(log_config.clone()).unwrap_or(log_config);

    let _guard = init_logging(&log_config)?;

    info!("Starting Bloom Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store = open_store(&config.store).await?;
    let supervisor = Arc::new(ProcessSupervisor::new(config.agent.clone()));

    let state = AppState {
        supervisor: supervisor.clone(),
        store,
        chats_collection: config.chats_collection.clone(),
    };
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    serve_until(listener, app, shutdown_signal(), drain).await?;

    // The agent must not outlive the launcher
    if supervisor.is_running().await {
        info!("Stopping running agent");
        if let Err(e) = supervisor.stop().await {
            error!("Failed to stop agent: {}", e);
        }
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
