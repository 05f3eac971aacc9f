//! MSB-first bit streams shared by the Rice and HCOMPRESS codecs.

use crate::error::{Error, Result};

/// Packs values into bytes, most significant bit first.
#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    acc_bits: u32,
}

impl BitWriter {
    pub fn with_capacity(bytes: usize) -> Self {
        BitWriter {
            buf: Vec::with_capacity(bytes),
            ..BitWriter::default()
        }
    }

    /// Append the low `n` bits of `value` (`n <= 32`).
    pub fn write(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        if n == 0 {
            return;
        }
        let masked = u64::from(value) & ((1u64 << n) - 1);
        self.acc = (self.acc << n) | masked;
        self.acc_bits += n;
        while self.acc_bits >= 8 {
            self.acc_bits -= 8;
            self.buf.push((self.acc >> self.acc_bits) as u8);
        }
        self.acc &= (1u64 << self.acc_bits) - 1;
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.write(u32::from(bit), 1);
    }

    /// Append `n` zero bits.
    pub fn write_zeros(&mut self, mut n: usize) {
        while n > 0 {
            let chunk = n.min(32);
            self.write(0, chunk as u32);
            n -= chunk;
        }
    }

    /// Pad the last partial byte with zeros.
    pub fn flush(&mut self) {
        if self.acc_bits > 0 {
            self.buf.push((self.acc << (8 - self.acc_bits)) as u8);
            self.acc = 0;
            self.acc_bits = 0;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.buf
    }
}

/// Reads bits most significant first. Running past the end is an error.
#[derive(Debug)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.pos / 8)
            .ok_or(Error::DecompressionError("compressed stream ends early"))?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    /// Read `n` bits (`n <= 32`) as an unsigned value.
    pub fn read(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value as u32)
    }

    /// Count zero bits up to and including the next one bit.
    pub fn read_unary(&mut self) -> Result<u32> {
        let mut zeros = 0u32;
        while !self.read_bit()? {
            zeros += 1;
        }
        Ok(zeros)
    }

    /// Skip to the start of the next byte.
    pub fn align(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_msb_first() {
        let mut w = BitWriter::default();
        w.write(0b101, 3);
        w.write(0b1, 1);
        w.write(0xF, 4);
        w.write(0b11, 2);
        assert_eq!(w.finish(), vec![0b1011_1111, 0b1100_0000]);
    }

    #[test]
    fn wide_values_round_trip() {
        let mut w = BitWriter::default();
        w.write(0xDEAD_BEEF, 32);
        w.write(3, 5);
        w.write_zeros(40);
        w.write_bit(true);
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read(5).unwrap(), 3);
        assert_eq!(r.read_unary().unwrap(), 40);
    }

    #[test]
    fn align_skips_the_padding() {
        let mut w = BitWriter::default();
        w.write(1, 3);
        w.flush();
        w.write(0xAB, 8);
        let bytes = w.finish();
        assert_eq!(bytes, vec![0b0010_0000, 0xAB]);
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3).unwrap(), 1);
        r.align();
        assert_eq!(r.read(8).unwrap(), 0xAB);
        assert!(r.read_bit().is_err());
    }
}
