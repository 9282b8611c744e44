//! Streaming codec for reading frames off a byte stream.
//!
//! Frames carry no length prefix; the length follows from the kind tag in
//! the header, so the decoder waits for a full header before it knows how
//! much more to wait for. A bad magic byte or unknown tag means the stream
//! has lost framing and is reported as an error rather than resynced.

use std::io;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use tsim_core::Reading;

use crate::frame::{self, DecodeError, EncodeError, MAX_FRAME_LEN};

/// Errors produced by [`FrameCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

/// `tokio_util` codec for telemetry frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Reading;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let len = match frame::peek_frame_len(src) {
            Ok((_, len)) => len,
            Err(DecodeError::Incomplete { needed, available }) => {
                src.reserve(needed.saturating_sub(available));
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let (reading, used) = frame::decode(src)?;
        src.advance(used);
        Ok(Some(reading))
    }
}

impl Encoder<Reading> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Reading, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame::encode(&item, &mut buf)?;
        dst.extend_from_slice(buf.get(..len).unwrap_or_default());
        Ok(())
    }
}
