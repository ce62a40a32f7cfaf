use std::{borrow::Cow, io::Read};

use anyhow::{ensure, Context, Result};
use flate2::bufread::ZlibDecoder;
use zerocopy::BigEndian;

use crate::util::read::{read_u32, slice_at};

// Zlib block container
pub const ZLB_MAGIC: [u8; 4] = *b"ZLB\0";
const ZLB_HEADER_SIZE: usize = 0x10;

/// Unwraps a ZLB container, or borrows the input when it is not compressed.
pub fn decompress_asset(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if data.len() < 4 || data[0..4] != ZLB_MAGIC {
        return Ok(Cow::Borrowed(data));
    }
    let version = read_u32::<BigEndian>(data, 0x4)?;
    ensure!(version == 1, "Unsupported ZLB version {version}");
    let decompressed_size = read_u32::<BigEndian>(data, 0x8)? as usize;
    let compressed_size = read_u32::<BigEndian>(data, 0xc)? as usize;
    let compressed = slice_at(data, ZLB_HEADER_SIZE, compressed_size)?;
    let mut out = vec![0u8; decompressed_size];
    ZlibDecoder::new(compressed).read_exact(&mut out).context("Failed to inflate ZLB data")?;
    Ok(Cow::Owned(out))
}
