//! tsim - tail a telemetry stream
//!
//! Connects to a running `tsimd`, decodes the binary frame stream and
//! prints one line per reading.
//!
//! # Usage
//!
//! ```text
//! tsim                          # human-readable lines from 127.0.0.1:8080
//! tsim --addr host:9000 --json  # one JSON object per line
//! tsim --count 10               # exit after ten readings
//! ```

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tsim_client::{format_reading, ClientConfig, OutputFormat, TelemetryClient, DEFAULT_ADDR};

/// Reading buffer between the socket and stdout.
const CHANNEL_CAPACITY: usize = 64;

/// tsim - print readings streamed by a tsim daemon
#[derive(Parser, Debug)]
#[command(name = "tsim", version, about)]
struct Args {
    /// Daemon address as host:port
    #[arg(short, long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Print one JSON object per line
    #[arg(long)]
    json: bool,

    /// Exit after this many readings
    #[arg(short = 'n', long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only readings.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tsim=warn".parse()?)
                .add_directive("tsim_client=warn".parse()?),
        )
        .init();

    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Received Ctrl+C");
        }
        ctrl_c_token.cancel();
    });

    let client = TelemetryClient::new(
        ClientConfig {
            addr: args.addr,
            ..ClientConfig::default()
        },
        cancel_token.clone(),
    );
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let client_task = tokio::spawn(async move { client.run(tx).await });

    let mut stdout = io::stdout();
    let mut printed = 0u64;
    while let Some(reading) = rx.recv().await {
        let line = format_reading(&reading, format).context("Failed to format reading")?;
        if let Err(e) = writeln!(stdout, "{line}") {
            // Reader went away (e.g. `tsim | head`).
            if e.kind() == io::ErrorKind::BrokenPipe {
                break;
            }
            return Err(e).context("Failed to write to stdout");
        }

        printed += 1;
        if args.count.is_some_and(|n| printed >= n) {
            break;
        }
    }

    cancel_token.cancel();
    drop(rx);
    client_task.await.context("Client task failed")?;
    info!(printed, "tsim stopped");
    Ok(())
}
