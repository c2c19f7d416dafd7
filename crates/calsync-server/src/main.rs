//! calsync-server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use calsync_core::{LogFormat, TracingConfig, init_tracing, parse_level};
use calsync_server::{AppState, ServerConfig, ServerResult, router};
use clap::Parser;
use tracing::{error, info};

/// calsync - multi-account calendar API
#[derive(Debug, Parser)]
#[command(name = "calsync-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(long, env = "CALSYNC_LISTEN")]
    listen: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    debug: bool,

    /// Log format: pretty, compact or json
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            eprintln!("calsync-server: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    init_tracing(tracing_config(&cli, &config)?)?;
    config.validate()?;

    let state = AppState::from_config(&config).await?;
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(listen = %config.listen, public_url = %config.public_url, "calsync server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("calsync server stopped");
    Ok(())
}

fn tracing_config(cli: &Cli, config: &ServerConfig) -> ServerResult<TracingConfig> {
    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        parse_level(&config.logging.level)?
    };
    let format: LogFormat = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.logging.format)
        .parse()?;

    Ok(TracingConfig::default().with_level(level).with_format(format))
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

