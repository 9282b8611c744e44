//! tsim Daemon - Simulated sensor fleet and telemetry broadcast server
//!
//! This crate provides the daemon side of tsim:
//! - `config` - TOML configuration and the built-in source fleet
//! - `registry` - Lock-guarded source registry shared by all tasks
//! - `scheduler` - One periodic updater task per active source
//! - `server` - Single-threaded `mio` loop accepting clients and
//!   broadcasting encoded frames
//! - `daemon` - Startup wiring and ordered teardown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        tsimd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ updater tasks   │────▶│     SourceRegistry          │   │
//! │  │ (tokio, 1/src)  │     │  (one lock, all sources)    │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ copy reading      │
//! │                                         ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ TCP clients     │◀────│     TelemetryServer         │   │
//! │  │                 │     │  (mio loop, blocking thread)│   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Per-client and per-source failures are logged and contained

pub mod config;
pub mod daemon;
pub mod registry;
pub mod scheduler;
pub mod server;

pub use config::{Config, ConfigError};
pub use daemon::{Daemon, DaemonError, RunSummary};
pub use registry::{RegistryError, SourceRegistry};
pub use server::{ServerError, ShutdownHandle, TelemetryServer};
