//! tsim Core - Shared types for simulated telemetry sources
//!
//! This crate provides the domain model shared between the daemon
//! (tsimd), the wire protocol (tsim-protocol) and the stream client.
//!
//! - `source` - instruments, their kinds and per-kind state
//! - `reading` - immutable timestamped snapshots of a source
//! - `simulate` - bounded random-walk update functions and the clock
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod reading;
pub mod simulate;
pub mod source;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use reading::{Reading, ReadingValue, StatusText, STATUS_TEXT_LEN};
pub use simulate::{current_time_millis, NO_STATUSES_SENTINEL, TIMESTAMP_UNAVAILABLE};
pub use source::{
    GpsState, ScalarState, Source, SourceId, SourceKind, SourceState, StatusState, MAX_STATUSES,
};
