//! Single-frame encoding and decoding.

use thiserror::Error;

use tsim_core::{Reading, ReadingValue, SourceId, SourceKind, StatusText, STATUS_TEXT_LEN};

use crate::endian;

/// First byte of every frame.
pub const MAGIC: u8 = b'T';

/// magic + id + kind + timestamp
pub const HEADER_LEN: usize = 1 + 4 + 1 + 8;

pub const SCALAR_FRAME_LEN: usize = HEADER_LEN + 4;
pub const GPS_FRAME_LEN: usize = HEADER_LEN + 8 + 8;
pub const STATUS_FRAME_LEN: usize = HEADER_LEN + STATUS_TEXT_LEN;

/// Largest frame of any kind; a buffer of this size fits every frame.
pub const MAX_FRAME_LEN: usize = STATUS_FRAME_LEN;

const ID_OFFSET: usize = 1;
const KIND_OFFSET: usize = 5;
const TIMESTAMP_OFFSET: usize = 6;

/// Returns the total frame length for a kind.
pub const fn frame_len(kind: SourceKind) -> usize {
    match kind {
        SourceKind::Temperature | SourceKind::Pressure | SourceKind::Humidity => SCALAR_FRAME_LEN,
        SourceKind::Gps => GPS_FRAME_LEN,
        SourceKind::Status => STATUS_FRAME_LEN,
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while encoding a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Source {id} ({kind}) has no data to encode")]
    NoData { id: SourceId, kind: SourceKind },

    #[error("Frame needs {needed} bytes, buffer has {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Errors that can occur while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// More bytes are required; `needed` is the full frame length if the
    /// header is available, otherwise the header length
    #[error("Incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    #[error("Bad frame magic: 0x{0:02x}")]
    BadMagic(u8),

    #[error("Unknown kind tag: {0}")]
    UnknownKind(u8),

    #[error("Status text is not valid UTF-8")]
    InvalidStatusText,
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `reading` into the front of `buf`, returning the frame length.
///
/// # Errors
///
/// - `EncodeError::NoData` if the value is empty or does not belong to the
///   reading's kind
/// - `EncodeError::BufferTooSmall` if `buf` cannot hold the frame
pub fn encode(reading: &Reading, buf: &mut [u8]) -> Result<usize, EncodeError> {
    if !reading.has_data() {
        return Err(EncodeError::NoData {
            id: reading.id,
            kind: reading.kind,
        });
    }

    let len = frame_len(reading.kind);
    let too_small = EncodeError::BufferTooSmall {
        needed: len,
        available: buf.len(),
    };
    let frame = buf.get_mut(..len).ok_or_else(|| too_small.clone())?;

    let (header, value) = frame.split_at_mut(HEADER_LEN);
    write_header(reading, header).ok_or_else(|| too_small.clone())?;

    let written = match reading.value {
        ReadingValue::Scalar(v) => endian::put_f32(value, v),
        ReadingValue::Gps { lat, lon } => {
            let (lat_bytes, lon_bytes) = value.split_at_mut(8);
            endian::put_f64(lat_bytes, lat).and_then(|()| endian::put_f64(lon_bytes, lon))
        }
        ReadingValue::Status(text) => value
            .get_mut(..STATUS_TEXT_LEN)
            .map(|dst| dst.copy_from_slice(text.as_padded_bytes())),
        ReadingValue::Empty => None,
    };
    written.ok_or(too_small)?;

    Ok(len)
}

fn write_header(reading: &Reading, header: &mut [u8]) -> Option<()> {
    *header.first_mut()? = MAGIC;
    endian::put_u32(header.get_mut(ID_OFFSET..)?, reading.id.get())?;
    *header.get_mut(KIND_OFFSET)? = reading.kind.tag();
    // The signed bit pattern is carried so the -1 sentinel round-trips
    endian::put_u64(
        header.get_mut(TIMESTAMP_OFFSET..)?,
        reading.timestamp_ms as u64,
    )
}

/// Encodes `reading` into a freshly allocated frame.
pub fn encode_to_vec(reading: &Reading) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; frame_len(reading.kind)];
    let len = encode(reading, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads the header and returns the kind and full frame length.
pub fn peek_frame_len(src: &[u8]) -> Result<(SourceKind, usize), DecodeError> {
    let magic = *src.first().ok_or(DecodeError::Incomplete {
        needed: HEADER_LEN,
        available: 0,
    })?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    if src.len() < HEADER_LEN {
        return Err(DecodeError::Incomplete {
            needed: HEADER_LEN,
            available: src.len(),
        });
    }
    let tag = src.get(KIND_OFFSET).copied().unwrap_or_default();
    let kind = SourceKind::from_tag(tag).ok_or(DecodeError::UnknownKind(tag))?;
    Ok((kind, frame_len(kind)))
}

/// Decodes one frame from the front of `src`.
///
/// Returns the reading and the number of bytes consumed.
pub fn decode(src: &[u8]) -> Result<(Reading, usize), DecodeError> {
    let (kind, len) = peek_frame_len(src)?;
    let incomplete = DecodeError::Incomplete {
        needed: len,
        available: src.len(),
    };
    let frame = src.get(..len).ok_or_else(|| incomplete.clone())?;

    let id = frame
        .get(ID_OFFSET..)
        .and_then(endian::get_u32)
        .ok_or_else(|| incomplete.clone())?;
    let timestamp = frame
        .get(TIMESTAMP_OFFSET..)
        .and_then(endian::get_u64)
        .ok_or_else(|| incomplete.clone())?;
    let value = frame.get(HEADER_LEN..).ok_or_else(|| incomplete.clone())?;

    let value = match kind {
        SourceKind::Temperature | SourceKind::Pressure | SourceKind::Humidity => {
            ReadingValue::Scalar(endian::get_f32(value).ok_or(incomplete)?)
        }
        SourceKind::Gps => {
            let lat = endian::get_f64(value).ok_or_else(|| incomplete.clone())?;
            let lon = value.get(8..).and_then(endian::get_f64).ok_or(incomplete)?;
            ReadingValue::Gps { lat, lon }
        }
        SourceKind::Status => ReadingValue::Status(decode_status(value)?),
    };

    Ok((
        Reading {
            id: SourceId::new(id),
            kind,
            timestamp_ms: timestamp as i64,
            value,
        },
        len,
    ))
}

/// Text ends at the first zero byte; everything after it is padding.
fn decode_status(field: &[u8]) -> Result<StatusText, DecodeError> {
    let field = field.get(..STATUS_TEXT_LEN).unwrap_or(field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = field
        .get(..end)
        .and_then(|b| std::str::from_utf8(b).ok())
        .ok_or(DecodeError::InvalidStatusText)?;
    Ok(StatusText::new(text))
}
