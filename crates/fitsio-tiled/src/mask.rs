//! Null-pixel masks for integer tiles.
//!
//! One byte per sample, 1 where the sample equals the image's `BLANK`
//! value. Masks are only built for tiles that contain at least one null and
//! are stored in the `NULL_PIXEL_MASK` column, compressed with `ZMASKCMP`.

use crate::array::{ElementType, ImageData};
use crate::codec::TileCodec;
use crate::error::{Error, Result};

/// Per-sample null flags of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullMask {
    flags: Vec<u8>,
}

impl NullMask {
    /// Build the mask for a tile, or `None` when the tile has no nulls.
    ///
    /// Float tiles never get a mask: NaN marks their nulls.
    pub fn detect(samples: &ImageData, null_value: i64) -> Option<NullMask> {
        let values = samples.to_i64()?;
        let flags: Vec<u8> = values.iter().map(|&v| u8::from(v == null_value)).collect();
        flags.contains(&1).then_some(NullMask { flags })
    }

    pub fn from_flags(flags: Vec<u8>) -> NullMask {
        NullMask { flags }
    }

    pub fn flags(&self) -> &[u8] {
        &self.flags
    }

    /// Number of null samples.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&f| f != 0).count()
    }

    pub fn compress(&self, codec: &dyn TileCodec, shape: &[usize]) -> Result<Vec<u8>> {
        codec.compress(&ImageData::U8(self.flags.clone()), shape)
    }

    pub fn decompress(bytes: &[u8], codec: &dyn TileCodec, shape: &[usize]) -> Result<NullMask> {
        match codec.decompress(bytes, ElementType::U8, shape)? {
            ImageData::U8(flags) => Ok(NullMask { flags }),
            _ => Err(Error::DecompressionError("null mask is not byte data")),
        }
    }

    /// Set every flagged sample to `null_value`.
    pub fn apply(&self, samples: &mut ImageData, null_value: i64) -> Result<()> {
        fn fill<T: Copy + TryFrom<i64>>(v: &mut [T], flags: &[u8], null_value: i64) -> Result<()> {
            let blank = T::try_from(null_value).map_err(|_| Error::InvalidValue)?;
            for (x, &f) in v.iter_mut().zip(flags) {
                if f != 0 {
                    *x = blank;
                }
            }
            Ok(())
        }
        if samples.len() != self.flags.len() {
            return Err(Error::DecompressionError("null mask size does not match its tile"));
        }
        match samples {
            ImageData::U8(v) => fill(v, &self.flags, null_value),
            ImageData::I8(v) => fill(v, &self.flags, null_value),
            ImageData::I16(v) => fill(v, &self.flags, null_value),
            ImageData::U16(v) => fill(v, &self.flags, null_value),
            ImageData::I32(v) => fill(v, &self.flags, null_value),
            ImageData::U32(v) => fill(v, &self.flags, null_value),
            ImageData::I64(v) => fill(v, &self.flags, null_value),
            ImageData::U64(v) => fill(v, &self.flags, null_value),
            ImageData::F32(_) | ImageData::F64(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::rice::RiceCodec;

    #[test]
    fn detect_only_with_nulls() {
        let clean = ImageData::I16(vec![1, 2, 3]);
        assert!(NullMask::detect(&clean, -32768).is_none());
        let dirty = ImageData::I16(vec![1, -32768, 3, -32768]);
        let mask = NullMask::detect(&dirty, -32768).unwrap();
        assert_eq!(mask.flags(), &[0, 1, 0, 1]);
        assert_eq!(mask.count(), 2);
        assert!(NullMask::detect(&ImageData::F32(vec![f32::NAN]), 0).is_none());
    }

    #[test]
    fn compressed_mask_restores_nulls() {
        let mut flags = vec![0u8; 100];
        flags[17] = 1;
        flags[99] = 1;
        let mask = NullMask::from_flags(flags);
        let codec = RiceCodec::default();
        let packed = mask.compress(&codec, &[10, 10]).unwrap();
        let back = NullMask::decompress(&packed, &codec, &[10, 10]).unwrap();
        assert_eq!(back, mask);

        let mut samples = ImageData::I32(vec![5; 100]);
        back.apply(&mut samples, -999).unwrap();
        let ImageData::I32(v) = samples else { unreachable!() };
        assert_eq!(v[17], -999);
        assert_eq!(v[99], -999);
        assert_eq!(v.iter().filter(|&&x| x == -999).count(), 2);
    }

    #[test]
    fn blank_must_fit_the_type() {
        let mask = NullMask::from_flags(vec![1]);
        let mut samples = ImageData::U8(vec![0]);
        assert!(mask.apply(&mut samples, -1).is_err());
    }
}
