//! Bloom Ingest - ThingSpeak poller and serial relay

use anyhow::{Context, Result};
use bloom_common::logging::{init_logging, LogConfig, LogLevel};
use bloom_ingest::{
    config::{IngestConfig, RelayConfig},
    poller::Poller,
    relay::Relay,
    store::open_store,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bloom-ingest")]
#[command(author, version, about = "Plant sensor ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the feed until interrupted
    Run,

    /// Run a single poll cycle and exit
    Once,

    /// Upload serial sensor lines to the feed
    Relay {
        /// Device or file to read lines from, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bloom-ingest")
        .filter_directives("reqwest=warn,hyper=warn,sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env_or(log_config.clone()).unwrap_or(log_config);

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run => {
            let poller = build_poller().await?;
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_shutdown(cancel.clone()));
            poller.run(cancel).await;
        },
        Command::Once => {
            let report = build_poller().await?.run_cycle().await;
            report.log();
        },
        Command::Relay { input } => {
            let config = RelayConfig::load().context("Invalid relay configuration")?;
            let relay = Relay::new(config)?;
            let reader = open_input(&input).await?;
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_shutdown(cancel.clone()));
            relay.run(reader, cancel).await?;
        },
    }

    info!("Done");
    Ok(())
}

async fn build_poller() -> Result<Poller> {
    let config = IngestConfig::load().context("Invalid ingestion configuration")?;
    info!(
        feed = %config.feed.url,
        store = config.store.kind(),
        interval_secs = config.poll_interval.as_secs(),
        "Configuration loaded"
    );

    let store = open_store(&config.store).await?;
    Ok(Poller::from_config(&config, store)?)
}

async fn open_input(input: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input.as_os_str() == "-" {
        info!("Reading sensor lines from stdin");
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open {}", input.display()))?;
    info!(input = %input.display(), "Reading sensor lines");
    Ok(Box::new(BufReader::new(file)))
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    token.cancel();
}
