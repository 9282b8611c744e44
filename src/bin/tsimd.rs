//! tsim Daemon - Simulated sensor fleet and telemetry broadcaster
//!
//! Simulates a fleet of sensors and streams their latest readings as
//! binary frames to every TCP client once per broadcast tick.
//!
//! # Usage
//!
//! ```bash
//! # Built-in fleet on 0.0.0.0:8080
//! tsimd
//!
//! # Custom fleet and address
//! tsimd --config fleet.toml --bind 127.0.0.1:9000
//!
//! # Same, via environment
//! TSIM_CONFIG=fleet.toml TSIM_BIND=127.0.0.1:9000 tsimd
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tsimd::{Config, Daemon};

/// tsim daemon - simulated sensor telemetry over TCP
#[derive(Parser, Debug)]
#[command(name = "tsimd", version, about)]
struct Args {
    /// Path to a TOML configuration file [env: TSIM_CONFIG]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration [env: TSIM_BIND]
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args
        .config
        .clone()
        .or_else(|| env::var_os("TSIM_CONFIG").map(PathBuf::from));

    let mut config = match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let bind = match args.bind {
        Some(bind) => Some(bind),
        None => match env::var("TSIM_BIND") {
            Ok(value) => Some(
                value
                    .parse()
                    .with_context(|| format!("Invalid TSIM_BIND address: {value}"))?,
            ),
            Err(_) => None,
        },
    };
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tsimd=info".parse()?)
                .add_directive("tsim_core=info".parse()?)
                .add_directive("tsim_protocol=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "tsim daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let daemon = Daemon::bind(&config, cancel_token).context("Failed to start daemon")?;
    info!(
        addr = %daemon.local_addr().context("Listener has no local address")?,
        sources = config.sources.len(),
        "Daemon bound"
    );

    match daemon.run().await {
        Ok(summary) => {
            info!(
                broadcasts = summary.broadcasts,
                failed_updaters = summary.failed_updaters,
                "tsim daemon stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon error");
            Err(e.into())
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
