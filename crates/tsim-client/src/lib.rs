//! tsim Client - Consumer side of the telemetry stream
//!
//! - `client` - connect-with-backoff TCP client forwarding decoded readings
//! - `output` - human and JSON line formatting
//! - `error` - client error type

pub mod client;
pub mod error;
pub mod output;

pub use client::{ClientConfig, StreamEnd, TelemetryClient, DEFAULT_ADDR};
pub use error::{ClientError, Result};
pub use output::{format_reading, OutputFormat};
