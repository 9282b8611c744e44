//! Telemetry stream client.
//!
//! `TelemetryClient` connects to the daemon, decodes the frame stream and
//! forwards every reading over a channel. A dropped connection is retried
//! with exponential backoff until the token is cancelled or the receiving
//! side goes away.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::io;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tsim_core::Reading;
use tsim_protocol::FrameCodec;

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Connection and retry behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon address as `host:port`.
    pub addr: String,

    /// Delay before the first retry after a failed connect.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retries.
    pub retry_max_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    pub retry_multiplier: f64,
}

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            retry_multiplier: 2.0,
        }
    }
}

impl ClientConfig {
    /// Delay to use after `delay` failed.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}

// ============================================================================
// Client
// ============================================================================

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The daemon closed the connection.
    Disconnected,
    /// The token was cancelled.
    Cancelled,
    /// The reading receiver was dropped.
    ReceiverClosed,
}

pub struct TelemetryClient {
    config: ClientConfig,
    cancel_token: CancellationToken,
}

impl TelemetryClient {
    #[must_use]
    pub fn new(config: ClientConfig, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            cancel_token,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Streams readings into `tx`, reconnecting on disconnect.
    ///
    /// Returns once cancelled or once `tx` has no receiver.
    pub async fn run(&self, tx: mpsc::Sender<Reading>) {
        info!(addr = %self.config.addr, "Telemetry client starting");

        loop {
            let stream = match self.connect_with_retry().await {
                Ok(stream) => stream,
                Err(ClientError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Giving up on connection");
                    break;
                }
            };

            match self.stream_readings(stream, &tx).await {
                Ok(StreamEnd::Disconnected) => info!("Daemon closed the connection"),
                Ok(StreamEnd::Cancelled | StreamEnd::ReceiverClosed) => break,
                Err(e) => warn!(error = %e, "Connection ended with error"),
            }

            if self.cancel_token.is_cancelled() || tx.is_closed() {
                break;
            }
        }

        info!("Telemetry client stopped");
    }

    /// Connects to the daemon, retrying with exponential backoff until
    /// successful or cancelled.
    ///
    /// A malformed address fails immediately with `ClientError::Connection`.
    pub async fn connect_with_retry(&self) -> Result<TcpStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            match TcpStream::connect(&self.config.addr).await {
                Ok(stream) => {
                    info!(addr = %self.config.addr, attempt, "Connected to daemon");
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                    return Err(ClientError::Connection {
                        addr: self.config.addr.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) if attempt == 1 => {
                    warn!(addr = %self.config.addr, error = %e, "Daemon not reachable, will retry");
                }
                Err(e) => debug!(attempt, error = %e, "Connection attempt failed"),
            }

            tokio::select! {
                _ = sleep(delay) => delay = self.config.next_delay(delay),
                _ = self.cancel_token.cancelled() => return Err(ClientError::Cancelled),
            }
        }
    }

    /// Forwards readings from one connection until it ends.
    pub async fn stream_readings(
        &self,
        stream: TcpStream,
        tx: &mpsc::Sender<Reading>,
    ) -> Result<StreamEnd> {
        let mut frames = FramedRead::new(stream, FrameCodec::new());

        loop {
            let next = tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(StreamEnd::Cancelled),
                next = frames.next() => next,
            };

            let reading = match next {
                Some(Ok(reading)) => reading,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(StreamEnd::Disconnected),
            };

            if tx.send(reading).await.is_err() {
                return Ok(StreamEnd::ReceiverClosed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tsim_core::{ReadingValue, SourceId, SourceKind};
    use tsim_protocol::encode_to_vec;

    fn reading(id: u32, value: f32) -> Reading {
        Reading {
            id: SourceId::new(id),
            kind: SourceKind::Pressure,
            timestamp_ms: 1_700_000_000_000,
            value: ReadingValue::Scalar(value),
        }
    }

    fn fast_config(addr: String) -> ClientConfig {
        ClientConfig {
            addr,
            retry_initial_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(40),
            retry_multiplier: 2.0,
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.retry_initial_delay, Duration::from_millis(500));
        assert_eq!(config.retry_max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = ClientConfig::default();
        let d1 = config.retry_initial_delay;
        let d2 = config.next_delay(d1);
        let d3 = config.next_delay(d2);
        assert_eq!(d2, Duration::from_secs(1));
        assert_eq!(d3, Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let config = ClientConfig::default();
        let mut delay = config.retry_initial_delay;
        for _ in 0..20 {
            delay = config.next_delay(delay);
        }
        assert_eq!(delay, config.retry_max_delay);
    }

    #[tokio::test]
    async fn test_streams_readings_from_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for (id, v) in [(1, 1.5), (2, 2.5)] {
                let frame = encode_to_vec(&reading(id, v)).unwrap();
                // Split writes to exercise partial frames.
                socket.write_all(&frame[..5]).await.unwrap();
                socket.write_all(&frame[5..]).await.unwrap();
            }
        });

        let client = TelemetryClient::new(fast_config(addr.to_string()), CancellationToken::new());
        let stream = client.connect_with_retry().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let end = client.stream_readings(stream, &tx).await.unwrap();
        assert_eq!(end, StreamEnd::Disconnected);
        assert_eq!(rx.recv().await, Some(reading(1, 1.5)));
        assert_eq!(rx.recv().await, Some(reading(2, 2.5)));
    }

    #[tokio::test]
    async fn test_garbage_stream_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        });

        let client = TelemetryClient::new(fast_config(addr.to_string()), CancellationToken::new());
        let stream = client.connect_with_retry().await.unwrap();
        let (tx, _rx) = mpsc::channel(8);

        let result = client.stream_readings(stream, &tx).await;
        assert!(matches!(result, Err(ClientError::Stream(_))));
    }

    #[tokio::test]
    async fn test_connect_retry_cancelled() {
        // Reserve a port, then free it so nothing is listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let cancel = CancellationToken::new();
        let client = TelemetryClient::new(fast_config(addr.to_string()), cancel.clone());

        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = client.connect_with_retry().await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_malformed_address_is_not_retried() {
        let client = TelemetryClient::new(
            fast_config("localhost-without-port".to_string()),
            CancellationToken::new(),
        );

        let result = tokio::time::timeout(Duration::from_secs(2), client.connect_with_retry())
            .await
            .unwrap();
        match result {
            Err(ClientError::Connection { addr, .. }) => {
                assert_eq!(addr, "localhost-without-port");
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_returns_on_malformed_address() {
        let client = TelemetryClient::new(
            fast_config("127.0.0.1:not-a-port".to_string()),
            CancellationToken::new(),
        );
        let (tx, _rx) = mpsc::channel(1);

        tokio::time::timeout(Duration::from_secs(2), client.run(tx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let frame = encode_to_vec(&reading(9, 0.0)).unwrap();
            loop {
                if socket.write_all(&frame).await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(5)).await;
            }
        });

        let client = TelemetryClient::new(fast_config(addr.to_string()), CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(1);
        let run = tokio::spawn(async move { client.run(tx).await });

        assert_eq!(rx.recv().await.map(|r| r.id), Some(SourceId::new(9)));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
    }
}
