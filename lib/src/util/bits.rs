use anyhow::{ensure, Result};

/// Bit cursor over a command stream.
///
/// Bits are consumed least-significant first within each byte, and a multi-bit
/// value is assembled with the first bit read as its least significant bit.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { data, pos: 0 } }

    #[inline]
    pub fn position(&self) -> usize { self.pos }

    #[inline]
    pub fn bit_len(&self) -> usize { self.data.len() * 8 }

    #[inline]
    pub fn remaining(&self) -> usize { self.bit_len() - self.pos }

    pub fn seek_bit(&mut self, addr: usize) -> Result<()> {
        ensure!(
            addr <= self.bit_len(),
            "Bit address {addr:#x} past end of stream ({:#x})",
            self.bit_len()
        );
        self.pos = addr;
        Ok(())
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        ensure!(n <= 32, "Cannot read {n} bits at once");
        ensure!(
            self.remaining() >= n as usize,
            "Read of {n} bits at bit {:#x} past end of stream ({:#x})",
            self.pos,
            self.bit_len()
        );
        let mut value = 0u32;
        for i in 0..n as usize {
            let bit = self.pos + i;
            value |= (((self.data[bit >> 3] >> (bit & 7)) & 1) as u32) << i;
        }
        self.pos += n as usize;
        Ok(value)
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> { Ok(self.read_bits(1)? != 0) }

    /// Advances to the next byte boundary (no-op when already aligned).
    pub fn align_to_byte(&mut self) { self.pos = ((self.pos + 7) & !7).min(self.bit_len()); }
}

/// Writer counterpart of [`BitReader`], used to build command streams in tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    pos: usize,
}

#[cfg(test)]
impl BitWriter {
    pub fn new() -> Self { Self::default() }

    pub fn position(&self) -> usize { self.pos }

    pub fn write_bits(&mut self, value: u32, n: u32) {
        for i in 0..n as usize {
            let bit = self.pos + i;
            if bit >> 3 >= self.data.len() {
                self.data.push(0);
            }
            if (value >> i) & 1 != 0 {
                self.data[bit >> 3] |= 1 << (bit & 7);
            }
        }
        self.pos += n as usize;
    }

    pub fn align_to_byte(&mut self) { self.pos = (self.pos + 7) & !7; }

    pub fn finish(self) -> Vec<u8> { self.data }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_lsb_first() {
        // 0b1011_0110, 0b0000_0001
        let data = [0xb6, 0x01];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(4).unwrap(), 0x6);
        assert_eq!(r.read_bits(6).unwrap(), 0b01_1011);
        assert_eq!(r.position(), 10);
        assert!(!r.read_bit().unwrap());
    }

    #[test]
    fn align_and_seek() {
        let data = [0xff, 0x5a, 0x00];
        let mut r = BitReader::new(&data);
        r.read_bits(3).unwrap();
        r.align_to_byte();
        assert_eq!(r.position(), 8);
        r.align_to_byte();
        assert_eq!(r.position(), 8);
        assert_eq!(r.read_bits(8).unwrap(), 0x5a);
        r.seek_bit(4).unwrap();
        assert_eq!(r.read_bits(4).unwrap(), 0xf);
        assert!(r.seek_bit(25).is_err());
    }

    #[test]
    fn read_past_end_fails() {
        let data = [0u8];
        let mut r = BitReader::new(&data);
        assert!(r.read_bits(9).is_err());
        assert_eq!(r.read_bits(8).unwrap(), 0);
        assert!(r.read_bit().is_err());
    }

    #[test]
    fn writer_matches_reader() {
        let mut w = BitWriter::new();
        w.write_bits(5, 4);
        w.write_bits(0x2a, 6);
        w.align_to_byte();
        w.write_bits(0xabc, 12);
        let data = w.finish();
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits(4).unwrap(), 5);
        assert_eq!(r.read_bits(6).unwrap(), 0x2a);
        r.align_to_byte();
        assert_eq!(r.read_bits(12).unwrap(), 0xabc);
    }
}
