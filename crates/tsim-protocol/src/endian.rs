//! Byte-order normalization.
//!
//! Floats are reinterpreted as their raw IEEE-754 bits and only the byte
//! order changes, so the receiving side recovers the exact value.
//!
//! Writers take a slice that must be exactly the field width and report
//! a short slice with `None`; callers size their buffers from the frame
//! layout constants.

pub fn put_u32(dst: &mut [u8], value: u32) -> Option<()> {
    put(dst, &value.to_be_bytes())
}

pub fn put_u64(dst: &mut [u8], value: u64) -> Option<()> {
    put(dst, &value.to_be_bytes())
}

pub fn put_f32(dst: &mut [u8], value: f32) -> Option<()> {
    put_u32(dst, value.to_bits())
}

pub fn put_f64(dst: &mut [u8], value: f64) -> Option<()> {
    put_u64(dst, value.to_bits())
}

pub fn get_u32(src: &[u8]) -> Option<u32> {
    src.get(..4)?.try_into().ok().map(u32::from_be_bytes)
}

pub fn get_u64(src: &[u8]) -> Option<u64> {
    src.get(..8)?.try_into().ok().map(u64::from_be_bytes)
}

pub fn get_f32(src: &[u8]) -> Option<f32> {
    get_u32(src).map(f32::from_bits)
}

pub fn get_f64(src: &[u8]) -> Option<f64> {
    get_u64(src).map(f64::from_bits)
}

fn put(dst: &mut [u8], bytes: &[u8]) -> Option<()> {
    dst.get_mut(..bytes.len())?.copy_from_slice(bytes);
    Some(())
}
