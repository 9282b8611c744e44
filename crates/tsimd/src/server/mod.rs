//! TCP broadcast server for the telemetry daemon.
//!
//! The server is a single-threaded readiness loop over `mio`. It alone
//! owns the listener and every client socket, so the watch set needs no
//! lock. Updater tasks run elsewhere and meet the loop only through the
//! source registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               TelemetryServer                │
//! │                                              │
//! │  Token(0) TcpListener ── accept ──┐          │
//! │  Token(1) Waker (shutdown)        ▼          │
//! │                        WatchSet<ClientConnection>
//! │                                   ▲          │
//! │  broadcast tick ── encode ────────┘          │
//! └──────────────────┬───────────────────────────┘
//!                    │ latest_reading (copy)
//!                    ▼
//!            Arc<SourceRegistry>
//! ```
//!
//! One iteration: wait for readiness (bounded by the poll timeout and
//! the next broadcast), accept pending connections, service ready
//! clients, then broadcast if the interval has elapsed.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Client and source errors are logged and stay local to that client
//!   or source; only a failing readiness wait ends the loop

mod connection;
mod listener;
mod watch_set;

pub use connection::{ClientConnection, Inbound, SendError};
pub use listener::bind_listener;
pub use watch_set::{Readiness, Retain, WatchSet, WatchSetError};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tsim_protocol::encode_to_vec;

use crate::config::ServerConfig;
use crate::registry::SourceRegistry;

/// Token of the listening socket.
pub const LISTENER_TOKEN: Token = Token(0);

/// Token of the shutdown waker.
pub const WAKER_TOKEN: Token = Token(1);

const FIRST_CLIENT_TOKEN: usize = 2;
const MAX_EVENTS: usize = 256;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to {stage} listening socket on {addr}: {error}")]
    Bind {
        addr: SocketAddr,
        stage: &'static str,
        error: String,
    },

    #[error("Failed to set up poller: {0}")]
    Setup(#[source] io::Error),

    #[error("Readiness wait failed: {0}")]
    Poll(#[source] io::Error),

    #[error("Listening socket failed")]
    Listener,
}

/// Loop timing and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub broadcast_interval: Duration,
    pub poll_timeout: Duration,
    pub initial_capacity: usize,
    pub max_outbox_bytes: usize,
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            broadcast_interval: config.broadcast_interval(),
            poll_timeout: config.poll_timeout(),
            initial_capacity: config.initial_watch_capacity,
            max_outbox_bytes: config.max_outbox_bytes,
        }
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Stops a running server from any thread.
///
/// Cancels the shared token and wakes the readiness wait so the loop
/// observes it immediately. Safe to trigger more than once.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    cancel_token: CancellationToken,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.cancel_token.cancel();
        self.wake();
    }

    /// Wakes the loop without cancelling, e.g. after the token was
    /// cancelled elsewhere.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }
}

/// Single-threaded accept, liveness and broadcast loop.
pub struct TelemetryServer {
    poll: Poll,
    listener: TcpListener,
    waker: Arc<Waker>,
    clients: WatchSet<ClientConnection>,
    registry: Arc<SourceRegistry>,
    cancel_token: CancellationToken,
    options: ServerOptions,
    last_broadcast: Instant,
    broadcasts: u64,
}

impl TelemetryServer {
    /// Creates a server around an already listening socket.
    pub fn new(
        mut listener: TcpListener,
        registry: Arc<SourceRegistry>,
        cancel_token: CancellationToken,
        options: ServerOptions,
    ) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(ServerError::Setup)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(ServerError::Setup)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(ServerError::Setup)?;

        Ok(Self {
            poll,
            listener,
            waker: Arc::new(waker),
            clients: WatchSet::new(options.initial_capacity, FIRST_CLIENT_TOKEN),
            registry,
            cancel_token,
            options,
            last_broadcast: Instant::now(),
            broadcasts: 0,
        })
    }

    /// Binds `config.bind` and creates a server on it.
    pub fn bind(
        config: &ServerConfig,
        registry: Arc<SourceRegistry>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = bind_listener(config.bind, config.backlog)?;
        let options = ServerOptions::from(config);
        Self::new(listener, registry, cancel_token, options)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel_token: self.cancel_token.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of broadcast ticks that reached at least one client.
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    /// Runs until the cancellation token is triggered.
    ///
    /// Blocks the calling thread; run it on a dedicated thread or via
    /// `tokio::task::spawn_blocking`.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        self.last_broadcast = Instant::now();

        info!(
            addr = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            broadcast_ms = self.options.broadcast_interval.as_millis() as u64,
            "Telemetry server listening"
        );

        while !self.cancel_token.is_cancelled() {
            let timeout = self.next_wait();
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Readiness wait failed");
                return Err(ServerError::Poll(e));
            }

            let mut accept_ready = false;
            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => {
                        if event.is_error() {
                            error!("Listening socket reported an error");
                            return Err(ServerError::Listener);
                        }
                        accept_ready = true;
                    }
                    WAKER_TOKEN => trace!("Event loop woken"),
                    token => {
                        if !self.clients.mark_ready(token, Readiness::from_event(event)) {
                            trace!(token = token.0, "Event for departed client");
                        }
                    }
                }
            }

            if self.cancel_token.is_cancelled() {
                break;
            }
            if accept_ready {
                self.accept_pending();
            }
            self.service_clients();
            if self.last_broadcast.elapsed() >= self.options.broadcast_interval {
                self.broadcast();
            }
        }

        info!(clients = self.clients.len(), "Server shutdown requested");
        Ok(())
    }

    fn next_wait(&self) -> Duration {
        let until_broadcast = self
            .options
            .broadcast_interval
            .saturating_sub(self.last_broadcast.elapsed());
        self.options.poll_timeout.min(until_broadcast)
    }

    // ========================================================================
    // Accept
    // ========================================================================

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = ClientConnection::new(stream, peer, self.options.max_outbox_bytes);
        let token = match self.clients.insert(connection) {
            Ok(token) => token,
            Err(e) => {
                warn!(client = %peer, error = %e, "Rejecting connection");
                return;
            }
        };

        let registered = match self.clients.get_mut(token) {
            Some(client) => client.register(self.poll.registry(), token),
            None => return,
        };
        if let Err(e) = registered {
            warn!(client = %peer, error = %e, "Failed to register connection");
            self.clients.remove(token);
            return;
        }

        info!(
            client = %peer,
            clients = self.clients.len(),
            capacity = self.clients.capacity(),
            "Client connected"
        );
    }

    // ========================================================================
    // Client readiness
    // ========================================================================

    fn service_clients(&mut self) {
        let registry = self.poll.registry();
        let removed = self.clients.for_each_ready(|token, client, ready| {
            if ready.readable || ready.closed {
                match client.drain_inbound() {
                    Inbound::Open => {}
                    Inbound::Closed => {
                        debug!(client = %client.peer(), "Orderly disconnect");
                        return Retain::Remove;
                    }
                    Inbound::Failed(e) => {
                        warn!(client = %client.peer(), error = %e, "Receive failed");
                        return Retain::Remove;
                    }
                }
            }

            if ready.error {
                debug!(client = %client.peer(), "Socket error reported");
                return Retain::Remove;
            }

            if ready.writable && client.pending() > 0 {
                if let Err(e) = client.flush() {
                    warn!(client = %client.peer(), error = %e, "Send failed");
                    return Retain::Remove;
                }
                if let Err(e) = client.sync_interest(registry, token) {
                    warn!(client = %client.peer(), error = %e, "Failed to update interest");
                    return Retain::Remove;
                }
            }

            Retain::Keep
        });

        self.close_clients(removed);
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Encodes every active source once and pushes the frames to all
    /// clients.
    fn broadcast(&mut self) {
        self.last_broadcast = Instant::now();
        if self.clients.is_empty() {
            return;
        }

        let frames = self.collect_frames();
        if frames.is_empty() {
            return;
        }

        let registry = self.poll.registry();
        let removed = self.clients.for_each(|token, client| {
            for frame in &frames {
                if let Err(e) = client.send_frame(frame) {
                    warn!(client = %client.peer(), error = %e, "Send failed");
                    return Retain::Remove;
                }
            }
            if let Err(e) = client.sync_interest(registry, token) {
                warn!(client = %client.peer(), error = %e, "Failed to update interest");
                return Retain::Remove;
            }
            Retain::Keep
        });

        self.broadcasts += 1;
        debug!(
            frames = frames.len(),
            clients = self.clients.len(),
            dropped = removed.len(),
            "Broadcast tick"
        );
        self.close_clients(removed);
    }

    fn collect_frames(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(self.registry.len());
        for index in 0..self.registry.len() {
            let reading = match self.registry.latest_reading(index) {
                Ok(Some(reading)) => reading,
                Ok(None) => continue,
                Err(e) => {
                    warn!(index, error = %e, "Skipping source");
                    continue;
                }
            };
            match encode_to_vec(&reading) {
                Ok(frame) => frames.push(frame),
                Err(e) => warn!(source_id = %reading.id, error = %e, "Skipping source"),
            }
        }
        frames
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn close_clients(&mut self, removed: Vec<(Token, ClientConnection)>) {
        for (_, mut client) in removed {
            if let Err(e) = client.deregister(self.poll.registry()) {
                debug!(client = %client.peer(), error = %e, "Deregister failed");
            }
            info!(
                client = %client.peer(),
                remaining = self.clients.len(),
                "Client disconnected"
            );
        }
    }

    /// Closes every client socket and the listener.
    pub fn close(mut self) {
        let clients = self.clients.drain();
        let count = clients.len();
        for (_, mut client) in clients {
            let _ = client.deregister(self.poll.registry());
        }
        let _ = self.poll.registry().deregister(&mut self.listener);
        info!(clients = count, "Server closed");
    }
}

impl std::fmt::Debug for TelemetryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryServer")
            .field("clients", &self.clients.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
