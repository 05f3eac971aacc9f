//! Big-endian byte conversion for FITS data.
//!
//! FITS stores all binary data in big-endian (most-significant byte first)
//! format. Single values are read from and written to byte slices; whole
//! sample arrays go through [`BeElement`] with `bytemuck` doing the
//! reinterpretation.

use bytemuck::Pod;

/// Read a big-endian `i16` from the first 2 bytes of the slice.
#[inline]
pub fn read_i16_be(buf: &[u8]) -> i16 {
    i16::from_be_bytes([buf[0], buf[1]])
}

/// Read a big-endian `u32` from the first 4 bytes of the slice.
#[inline]
pub fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Read a big-endian `i32` from the first 4 bytes of the slice.
#[inline]
pub fn read_i32_be(buf: &[u8]) -> i32 {
    read_u32_be(buf) as i32
}

/// Read a big-endian `u64` from the first 8 bytes of the slice.
#[inline]
pub fn read_u64_be(buf: &[u8]) -> u64 {
    u64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}

/// Read a big-endian `i64` from the first 8 bytes of the slice.
#[inline]
pub fn read_i64_be(buf: &[u8]) -> i64 {
    read_u64_be(buf) as i64
}

/// Read a big-endian `f64` (IEEE 754) from the first 8 bytes of the slice.
#[inline]
pub fn read_f64_be(buf: &[u8]) -> f64 {
    f64::from_bits(read_u64_be(buf))
}

/// Write a `u32` in big-endian format into the first 4 bytes of the slice.
#[inline]
pub fn write_u32_be(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_be_bytes());
}

/// Write an `i32` in big-endian format into the first 4 bytes of the slice.
#[inline]
pub fn write_i32_be(buf: &mut [u8], val: i32) {
    write_u32_be(buf, val as u32);
}

/// Write a `u64` in big-endian format into the first 8 bytes of the slice.
#[inline]
pub fn write_u64_be(buf: &mut [u8], val: u64) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

/// Write an `f64` in big-endian format into the first 8 bytes of the slice.
#[inline]
pub fn write_f64_be(buf: &mut [u8], val: f64) {
    write_u64_be(buf, val.to_bits());
}

// --- Bulk conversions ---

/// A fixed-width sample type that FITS stores big-endian.
pub trait BeElement: Pod + Send + Sync {
    /// Size of one element in bytes.
    const SIZE: usize;

    /// Swap between native and big-endian byte order (an involution).
    fn swap_be(self) -> Self;
}

macro_rules! be_int {
    ($($t:ty),*) => {$(
        impl BeElement for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn swap_be(self) -> Self {
                <$t>::to_be(self)
            }
        }
    )*};
}

be_int!(u8, i8, i16, u16, i32, u32, i64, u64);

impl BeElement for f32 {
    const SIZE: usize = 4;

    #[inline]
    fn swap_be(self) -> Self {
        f32::from_bits(self.to_bits().to_be())
    }
}

impl BeElement for f64 {
    const SIZE: usize = 8;

    #[inline]
    fn swap_be(self) -> Self {
        f64::from_bits(self.to_bits().to_be())
    }
}

/// Decode a big-endian byte buffer into native values.
///
/// Trailing bytes that do not form a whole element are ignored.
pub fn decode_be<T: BeElement>(bytes: &[u8]) -> Vec<T> {
    let whole = bytes.len() - bytes.len() % T::SIZE;
    let mut values: Vec<T> = bytemuck::pod_collect_to_vec(&bytes[..whole]);
    for v in values.iter_mut() {
        *v = v.swap_be();
    }
    values
}

/// Encode native values as a big-endian byte buffer.
pub fn encode_be<T: BeElement>(values: &[T]) -> Vec<u8> {
    let swapped: Vec<T> = values.iter().map(|v| v.swap_be()).collect();
    bytemuck::cast_slice::<T, u8>(&swapped).to_vec()
}
