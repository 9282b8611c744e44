//! Error types for the stream client.

use thiserror::Error;
use tsim_protocol::CodecError;

/// Stream client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The daemon address can never be connected to.
    ///
    /// Raised for addresses that are not `host:port`; unreachable daemons
    /// are retried instead.
    #[error("Failed to connect to daemon at {addr}: {reason}")]
    Connection { addr: String, reason: String },

    /// The client was cancelled while connecting.
    #[error("Cancelled")]
    Cancelled,

    /// The byte stream could not be framed.
    ///
    /// A bad magic byte or unknown kind tag means the stream lost framing;
    /// the client drops the connection and reconnects.
    #[error("Stream error: {0}")]
    Stream(#[from] CodecError),

    #[error("Failed to format reading: {0}")]
    Format(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
