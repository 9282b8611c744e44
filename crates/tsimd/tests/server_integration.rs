//! Integration tests for the telemetry broadcast server.
//!
//! These tests run a complete daemon on a loopback port and talk to it
//! over real TCP sockets: frame delivery, disconnect handling, watch-set
//! growth and shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

use std::collections::HashSet;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use tsim_core::{Reading, ReadingValue, SourceId, SourceKind};
use tsim_protocol::{decode, peek_frame_len, HEADER_LEN};
use tsimd::config::{
    Config, GpsParams, ScalarParams, ServerConfig, SourceParams, SourceSpec, StatusParams,
};
use tsimd::{Daemon, DaemonError, RunSummary, SourceRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on waiting for a single frame
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on daemon shutdown after cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Time a non-reading client is left alone before it is checked
const STALL_PERIOD: Duration = Duration::from_secs(4);

/// Upper bound on draining a closed, stalled connection
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Helpers
// ============================================================================

fn scalar_spec(id: u32, min: f32, max: f32) -> SourceSpec {
    SourceSpec::new(
        id,
        20,
        SourceParams::Temperature(ScalarParams {
            current: (min + max) / 2.0,
            min,
            max,
            max_step: 5.0,
        }),
    )
}

fn status_spec(id: u32) -> SourceSpec {
    SourceSpec::new(
        id,
        60_000,
        SourceParams::Status(StatusParams {
            statuses: vec!["OK".into()],
        }),
    )
}

fn test_config(sources: Vec<SourceSpec>) -> Config {
    Config {
        server: ServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            broadcast_interval_ms: 50,
            poll_timeout_ms: 20,
            seed: Some(1),
            ..ServerConfig::default()
        },
        sources,
    }
}

/// Daemon running in the background on an ephemeral port.
struct TestDaemon {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    registry: Arc<SourceRegistry>,
    handle: JoinHandle<Result<RunSummary, DaemonError>>,
}

impl TestDaemon {
    fn spawn(config: Config) -> Self {
        let cancel_token = CancellationToken::new();
        let daemon = Daemon::bind(&config, cancel_token.clone()).expect("bind daemon");
        let addr = daemon.local_addr().expect("local addr");
        let registry = Arc::clone(daemon.registry());
        let handle = tokio::spawn(daemon.run());

        Self {
            addr,
            cancel_token,
            registry,
            handle,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect");
        TestClient { stream }
    }

    async fn shutdown(self) -> RunSummary {
        self.cancel_token.cancel();
        timeout(SHUTDOWN_TIMEOUT, self.handle)
            .await
            .expect("daemon stops in time")
            .expect("daemon task")
            .expect("daemon run")
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Reads one frame, returning the decoded reading and the raw bytes.
    async fn recv(&mut self) -> (Reading, Vec<u8>) {
        let mut frame = vec![0u8; HEADER_LEN];
        timeout(RECV_TIMEOUT, self.stream.read_exact(&mut frame))
            .await
            .expect("frame within timeout")
            .expect("read header");

        let (_, len) = peek_frame_len(&frame).expect("valid header");
        frame.resize(len, 0);
        self.stream
            .read_exact(&mut frame[HEADER_LEN..])
            .await
            .expect("read value");

        let (reading, used) = decode(&frame).expect("decode frame");
        assert_eq!(used, len);
        (reading, frame)
    }

    async fn recv_many(&mut self, count: usize) -> Vec<Reading> {
        let mut readings = Vec::with_capacity(count);
        for _ in 0..count {
            readings.push(self.recv().await.0);
        }
        readings
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_receives_active_sources_only() {
    let mut hidden = scalar_spec(3, 0.0, 10.0);
    hidden.active = false;
    let daemon = TestDaemon::spawn(test_config(vec![
        scalar_spec(1, 0.0, 100.0),
        SourceSpec::new(
            2,
            20,
            SourceParams::Gps(GpsParams {
                lat: 55.75,
                lon: 37.61,
                max_step: 0.001,
            }),
        ),
        hidden,
    ]));

    let mut client = daemon.connect().await;
    let readings = client.recv_many(6).await;

    let ids: HashSet<u32> = readings.iter().map(|r| r.id.get()).collect();
    assert_eq!(ids, [1, 2].into_iter().collect());
    for reading in &readings {
        assert!(reading.has_data());
        assert!(reading.timestamp_ms > 0);
    }

    let summary = daemon.shutdown().await;
    assert_eq!(summary.updaters, 2);
    assert_eq!(summary.failed_updaters, 0);
    assert!(summary.broadcasts >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_follow_registry_order() {
    let daemon = TestDaemon::spawn(test_config(vec![
        scalar_spec(10, 0.0, 1.0),
        scalar_spec(20, 0.0, 1.0),
        scalar_spec(30, 0.0, 1.0),
    ]));

    let mut client = daemon.connect().await;
    let mut first = client.recv().await.0;
    while first.id != SourceId::new(10) {
        first = client.recv().await.0;
    }
    let rest = client.recv_many(2).await;
    assert_eq!(rest[0].id, SourceId::new(20));
    assert_eq!(rest[1].id, SourceId::new(30));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_frame_is_zero_padded() {
    let daemon = TestDaemon::spawn(test_config(vec![SourceSpec::new(
        7,
        20,
        SourceParams::Status(StatusParams {
            statuses: vec!["OK".into()],
        }),
    )]));

    let mut client = daemon.connect().await;
    let (reading, frame) = client.recv().await;

    assert_eq!(reading.kind, SourceKind::Status);
    match reading.value {
        ReadingValue::Status(text) => assert_eq!(text.as_str(), "OK"),
        other => panic!("unexpected value {other:?}"),
    }
    assert_eq!(&frame[HEADER_LEN..HEADER_LEN + 2], b"OK");
    assert!(frame[HEADER_LEN + 2..].iter().all(|b| *b == 0));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streamed_values_stay_in_range() {
    let daemon = TestDaemon::spawn(test_config(vec![scalar_spec(1, -1.0, 1.0)]));

    let mut client = daemon.connect().await;
    for reading in client.recv_many(20).await {
        match reading.value {
            ReadingValue::Scalar(v) => assert!((-1.0..=1.0).contains(&v), "value {v}"),
            other => panic!("unexpected value {other:?}"),
        }
    }

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_bytes_are_ignored() {
    let daemon = TestDaemon::spawn(test_config(vec![scalar_spec(1, 0.0, 1.0)]));

    let mut client = daemon.connect().await;
    client
        .stream
        .write_all(b"hello, are you there?\n")
        .await
        .unwrap();
    client.recv_many(3).await;

    daemon.shutdown().await;
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orderly_disconnect_does_not_affect_others() {
    let daemon = TestDaemon::spawn(test_config(vec![scalar_spec(1, 0.0, 1.0)]));

    let mut staying = daemon.connect().await;
    let mut leaving = daemon.connect().await;
    staying.recv().await;
    leaving.recv().await;

    leaving.stream.shutdown().await.unwrap();
    drop(leaving);

    // Several more ticks reach the remaining client.
    staying.recv_many(5).await;

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_killed_client_does_not_affect_others() {
    let daemon = TestDaemon::spawn(test_config(vec![
        scalar_spec(1, 0.0, 1.0),
        scalar_spec(2, 0.0, 1.0),
        scalar_spec(3, 0.0, 1.0),
    ]));

    let mut survivor = daemon.connect().await;
    let victim = daemon.connect().await;
    survivor.recv().await;

    // Abort with RST instead of FIN.
    socket2::SockRef::from(&victim.stream)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(victim);

    // The survivor keeps getting complete ticks with every source.
    let ids: HashSet<u32> = survivor
        .recv_many(9)
        .await
        .iter()
        .map(|r| r.id.get())
        .collect();
    assert_eq!(ids, [1, 2, 3].into_iter().collect());

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_set_grows_past_initial_capacity() {
    let mut config = test_config(vec![scalar_spec(1, 0.0, 1.0)]);
    config.server.initial_watch_capacity = 1;
    let daemon = TestDaemon::spawn(config);

    let mut clients = Vec::new();
    for _ in 0..6 {
        clients.push(daemon.connect().await);
    }
    for client in &mut clients {
        let (reading, _) = client.recv().await;
        assert_eq!(reading.id, SourceId::new(1));
    }

    daemon.shutdown().await;
}

// ============================================================================
// Slow consumers
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_client_is_dropped_while_others_keep_receiving() {
    // 1000 status frames of 46 bytes per 10 ms tick.
    let sources = (1..=1000).map(status_spec).collect();
    let mut config = test_config(sources);
    config.server.broadcast_interval_ms = 10;
    config.server.max_outbox_bytes = 64 * 1024;
    let daemon = TestDaemon::spawn(config);

    let healthy = daemon.connect().await;
    let received = Arc::new(AtomicUsize::new(0));
    let reader = tokio::spawn({
        let received = Arc::clone(&received);
        async move {
            let mut stream = healthy.stream;
            let mut buf = vec![0u8; 64 * 1024];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                received.fetch_add(n, Ordering::Relaxed);
            }
        }
    });

    // Tiny receive window and no reads.
    let stalled = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    stalled.set_recv_buffer_size(2048).unwrap();
    stalled.connect(&daemon.addr.into()).unwrap();
    let mut stalled: std::net::TcpStream = stalled.into();

    sleep(STALL_PERIOD).await;

    // A removed client sees end-of-stream after the queued bytes; one still
    // being served would keep the reads going until the deadline.
    let closed = tokio::task::spawn_blocking(move || {
        stalled.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
        let deadline = std::time::Instant::now() + DRAIN_TIMEOUT;
        let mut buf = vec![0u8; 64 * 1024];
        while std::time::Instant::now() < deadline {
            match stalled.read(&mut buf) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(closed, "stalled client was not disconnected");

    let before = received.load(Ordering::Relaxed);
    assert!(before > 0);
    sleep(Duration::from_millis(200)).await;
    assert!(received.load(Ordering::Relaxed) > before);

    let summary = daemon.shutdown().await;
    assert_eq!(summary.failed_updaters, 0);
    timeout(RECV_TIMEOUT, reader).await.unwrap().unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sources_primed_before_first_broadcast() {
    let mut config = test_config(vec![scalar_spec(1, 0.0, 1.0)]);
    config.sources[0].interval_ms = 60_000;
    let daemon = TestDaemon::spawn(config);

    let primed = daemon.registry.latest_reading(0).unwrap();
    assert!(primed.is_some_and(|r| r.has_data()));

    // The updater will not fire for a minute, yet a frame arrives.
    let mut client = daemon.connect().await;
    let (reading, _) = client.recv().await;
    assert!(reading.has_data());

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_is_prompt_and_closes_listener() {
    let mut config = test_config(vec![scalar_spec(1, 0.0, 1.0)]);
    // Long waits everywhere; only the waker can end the loop quickly.
    config.server.poll_timeout_ms = 60_000;
    config.server.broadcast_interval_ms = 60_000;
    config.sources[0].interval_ms = 60_000;
    let daemon = TestDaemon::spawn(config);
    let addr = daemon.addr;

    let _client = daemon.connect().await;
    sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let summary = daemon.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(summary.failed_updaters, 0);

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_handle_from_another_thread() {
    let cancel_token = CancellationToken::new();
    let config = test_config(vec![scalar_spec(1, 0.0, 1.0)]);
    let daemon = Daemon::bind(&config, cancel_token.clone()).unwrap();
    let handle = daemon.shutdown_handle();
    let run = tokio::spawn(daemon.run());

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        handle.trigger();
        handle.trigger();
    });

    timeout(SHUTDOWN_TIMEOUT, run)
        .await
        .expect("daemon stops in time")
        .unwrap()
        .unwrap();
    assert!(cancel_token.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bind_conflict_is_fatal() {
    let first = TestDaemon::spawn(test_config(vec![scalar_spec(1, 0.0, 1.0)]));

    let mut config = test_config(vec![scalar_spec(1, 0.0, 1.0)]);
    config.server.bind = first.addr;
    let result = Daemon::bind(&config, CancellationToken::new());
    assert!(matches!(result, Err(DaemonError::Server(_))));

    first.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_config_is_fatal() {
    let mut config = test_config(vec![scalar_spec(1, 0.0, 1.0), scalar_spec(1, 0.0, 1.0)]);
    config.server.bind = "127.0.0.1:0".parse().unwrap();
    let result = Daemon::bind(&config, CancellationToken::new());
    assert!(matches!(result, Err(DaemonError::Config(_))));
}
