use anyhow::{anyhow, Result};
use zerocopy::ByteOrder;

/// Borrows `len` bytes at `offset`, failing instead of panicking when out of bounds.
#[inline]
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset.checked_add(len).and_then(|end| data.get(offset..end)).ok_or_else(|| {
        anyhow!("Read of {len:#x} bytes at {offset:#x} exceeds buffer size {:#x}", data.len())
    })
}

#[inline(always)]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> { Ok(slice_at(data, offset, 1)?[0]) }

#[inline(always)]
pub fn read_i8(data: &[u8], offset: usize) -> Result<i8> { Ok(read_u8(data, offset)? as i8) }

#[inline(always)]
pub fn read_u16<O: ByteOrder>(data: &[u8], offset: usize) -> Result<u16> {
    Ok(O::read_u16(slice_at(data, offset, 2)?))
}

#[inline(always)]
pub fn read_i16<O: ByteOrder>(data: &[u8], offset: usize) -> Result<i16> {
    Ok(O::read_i16(slice_at(data, offset, 2)?))
}

#[inline(always)]
pub fn read_u32<O: ByteOrder>(data: &[u8], offset: usize) -> Result<u32> {
    Ok(O::read_u32(slice_at(data, offset, 4)?))
}

#[inline(always)]
pub fn read_f32<O: ByteOrder>(data: &[u8], offset: usize) -> Result<f32> {
    Ok(O::read_f32(slice_at(data, offset, 4)?))
}
