//! tsim Protocol - Binary frame format for telemetry streams
//!
//! Every reading travels as one fixed-length, big-endian frame:
//!
//! ```text
//! offset  size  field
//! 0       1     magic 'T'
//! 1       4     source id (u32)
//! 5       1     kind tag (0=temperature 1=pressure 2=humidity 3=gps 4=status)
//! 6       8     timestamp, epoch milliseconds (u64)
//! 14      n     value: f32 | f64 lat + f64 lon | 32-byte zero-padded text
//! ```
//!
//! - `endian` - byte-order normalization for integers and floats
//! - `frame` - encoding and decoding of single frames
//! - `codec` - streaming `tokio_util` codec over a byte stream

pub mod codec;
pub mod endian;
pub mod frame;

pub use codec::{CodecError, FrameCodec};
pub use frame::{
    decode, encode, encode_to_vec, frame_len, peek_frame_len, DecodeError, EncodeError,
    GPS_FRAME_LEN, HEADER_LEN, MAGIC, MAX_FRAME_LEN, SCALAR_FRAME_LEN, STATUS_FRAME_LEN,
};
