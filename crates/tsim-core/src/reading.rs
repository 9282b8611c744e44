//! Readings: immutable snapshots of a source taken at one update.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::{SourceId, SourceKind};

/// Width in bytes of the fixed status text field.
///
/// At most `STATUS_TEXT_LEN - 1` bytes carry text; the final byte is always
/// a terminating zero.
pub const STATUS_TEXT_LEN: usize = 32;

// ============================================================================
// Status Text
// ============================================================================

/// Fixed-width, zero-padded status string.
///
/// Text longer than the field is truncated on a `char` boundary so the
/// stored bytes are always valid UTF-8.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatusText {
    bytes: [u8; STATUS_TEXT_LEN],
    len: usize,
}

impl StatusText {
    /// Maximum number of text bytes that fit in the field.
    pub const MAX_LEN: usize = STATUS_TEXT_LEN - 1;

    /// Creates a status text, truncating to [`Self::MAX_LEN`] bytes.
    pub fn new(text: &str) -> Self {
        let mut len = text.len().min(Self::MAX_LEN);
        while !text.is_char_boundary(len) {
            len -= 1;
        }

        let mut bytes = [0u8; STATUS_TEXT_LEN];
        if let (Some(dst), Some(src)) = (bytes.get_mut(..len), text.as_bytes().get(..len)) {
            dst.copy_from_slice(src);
        }
        Self { bytes, len }
    }

    /// Returns the text without padding.
    pub fn as_str(&self) -> &str {
        self.bytes
            .get(..self.len)
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or("")
    }

    /// Returns the full zero-padded field.
    pub fn as_padded_bytes(&self) -> &[u8; STATUS_TEXT_LEN] {
        &self.bytes
    }

    /// Returns true if `text` fits without truncation.
    pub fn fits(text: &str) -> bool {
        text.len() <= Self::MAX_LEN
    }
}

impl Default for StatusText {
    fn default() -> Self {
        Self {
            bytes: [0u8; STATUS_TEXT_LEN],
            len: 0,
        }
    }
}

impl fmt::Debug for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusText({:?})", self.as_str())
    }
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Reading Value
// ============================================================================

/// The value carried by a reading, matched on the same kind tag used on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingValue {
    /// Temperature, pressure or humidity
    Scalar(f32),

    /// Latitude and longitude in degrees
    Gps { lat: f64, lon: f64 },

    /// One of the configured status candidates
    Status(StatusText),

    /// No data: the source has never been updated, or its state did not
    /// match its kind
    Empty,
}

impl ReadingValue {
    /// Returns true if the value carries data.
    pub fn has_data(&self) -> bool {
        !matches!(self, ReadingValue::Empty)
    }

    /// Returns true if the value variant is the one used by `kind`.
    pub fn matches_kind(&self, kind: SourceKind) -> bool {
        match self {
            ReadingValue::Scalar(_) => kind.is_scalar(),
            ReadingValue::Gps { .. } => kind == SourceKind::Gps,
            ReadingValue::Status(_) => kind == SourceKind::Status,
            ReadingValue::Empty => false,
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Immutable snapshot of one source at one update.
///
/// `timestamp_ms` is epoch milliseconds, or
/// [`TIMESTAMP_UNAVAILABLE`](crate::TIMESTAMP_UNAVAILABLE) when the clock
/// could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub id: SourceId,
    pub kind: SourceKind,
    pub timestamp_ms: i64,
    pub value: ReadingValue,
}

impl Reading {
    /// Creates a reading with no data, used before the first update.
    pub fn empty(id: SourceId, kind: SourceKind) -> Self {
        Self {
            id,
            kind,
            timestamp_ms: 0,
            value: ReadingValue::Empty,
        }
    }

    /// Returns true if this reading carries data for its kind.
    pub fn has_data(&self) -> bool {
        self.value.matches_kind(self.kind)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            ReadingValue::Scalar(v) => write!(f, "{} {} = {:.3}", self.kind, self.id, v),
            ReadingValue::Gps { lat, lon } => {
                write!(f, "{} {} = ({:.6}, {:.6})", self.kind, self.id, lat, lon)
            }
            ReadingValue::Status(s) => write!(f, "{} {} = {}", self.kind, self.id, s),
            ReadingValue::Empty => write!(f, "{} {} = <no data>", self.kind, self.id),
        }
    }
}
