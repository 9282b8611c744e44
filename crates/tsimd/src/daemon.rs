//! Daemon lifecycle: wiring, run and ordered teardown.
//!
//! ```text
//! bind ─▶ prime registry ─▶ spawn updaters ─▶ run event loop (blocking)
//!                                                 │ token cancelled
//!                                                 ▼
//!              drop registry ◀─ close sockets ◀─ join updaters
//! ```
//!
//! The registry is released only after every updater has been joined.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, ConfigError};
use crate::registry::{RegistryError, SourceRegistry};
use crate::scheduler::{spawn_updaters, UpdaterExit};
use crate::server::{ServerError, ShutdownHandle, TelemetryServer};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Event loop task failed: {0}")]
    EventLoop(String),
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub updaters: usize,
    pub failed_updaters: usize,
    pub broadcasts: u64,
}

/// A bound, primed daemon that has not started running yet.
#[derive(Debug)]
pub struct Daemon {
    registry: Arc<SourceRegistry>,
    server: TelemetryServer,
    cancel_token: CancellationToken,
}

impl Daemon {
    /// Validates the configuration, primes every source and binds the
    /// listener. Every failure here is fatal.
    pub fn bind(config: &Config, cancel_token: CancellationToken) -> Result<Self, DaemonError> {
        let sources = config.build_sources()?;
        let registry = Arc::new(SourceRegistry::new(sources, config.server.seed));
        registry.prime()?;

        let server = TelemetryServer::bind(
            &config.server,
            Arc::clone(&registry),
            cancel_token.clone(),
        )?;

        Ok(Self {
            registry,
            server,
            cancel_token,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Runs until the cancellation token fires or the event loop fails.
    pub async fn run(self) -> Result<RunSummary, DaemonError> {
        let Self {
            registry,
            mut server,
            cancel_token,
        } = self;

        // Cancellation from anywhere must interrupt the readiness wait.
        let shutdown = server.shutdown_handle();
        let wake_token = cancel_token.clone();
        let waker_task = tokio::spawn(async move {
            wake_token.cancelled().await;
            shutdown.wake();
        });

        let updaters = match spawn_updaters(Arc::clone(&registry), cancel_token.clone()) {
            Ok(updaters) => updaters,
            Err(e) => {
                cancel_token.cancel();
                return Err(e.into());
            }
        };
        info!(
            sources = registry.len(),
            updaters = updaters.len(),
            "Daemon running"
        );

        let joined = tokio::task::spawn_blocking(move || {
            let result = server.run();
            (server, result)
        })
        .await;

        // Stop updaters whether the loop ended by request or by failure.
        cancel_token.cancel();
        let reports = updaters.join().await;
        let _ = waker_task.await;

        let (server, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Event loop task failed");
                return Err(DaemonError::EventLoop(e.to_string()));
            }
        };
        let broadcasts = server.broadcasts();
        server.close();
        drop(registry);
        result?;

        let failed_updaters = reports
            .iter()
            .filter(|r| r.exit != UpdaterExit::Cancelled)
            .count();
        info!(
            updaters = reports.len(),
            failed_updaters, broadcasts, "Daemon stopped"
        );

        Ok(RunSummary {
            updaters: reports.len(),
            failed_updaters,
            broadcasts,
        })
    }
}
