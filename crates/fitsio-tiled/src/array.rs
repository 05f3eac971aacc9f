//! Element types and typed sample buffers.

use std::borrow::Cow;

use crate::endian::{decode_be, encode_be};
use crate::error::{Error, Result};

/// Element type of an image.
///
/// `U8`, `I16`, `I32`, `I64`, `F32` and `F64` are stored as they are. The
/// other integer types are stored in the signed or unsigned type of the same
/// width and told apart by the `BZERO` offset of the FITS unsigned-integer
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

const OFFSET_TYPES: [ElementType; 4] = [ElementType::I8, ElementType::U16, ElementType::U32, ElementType::U64];

impl ElementType {
    /// The stored type for a BITPIX value.
    pub fn from_bitpix(bitpix: i64) -> Result<Self> {
        match bitpix {
            8 => Ok(ElementType::U8),
            16 => Ok(ElementType::I16),
            32 => Ok(ElementType::I32),
            64 => Ok(ElementType::I64),
            -32 => Ok(ElementType::F32),
            -64 => Ok(ElementType::F64),
            other => Err(Error::InvalidBitpix(other)),
        }
    }

    /// The type described by `BITPIX`, `BZERO` and `BSCALE` together.
    ///
    /// A `BZERO` that is not the exact offset of a type of the same width,
    /// or any `BSCALE` other than 1, is ordinary scaling and leaves the
    /// stored type unchanged.
    pub fn from_scaling(bitpix: i64, bzero: Option<f64>, bscale: Option<f64>) -> Result<Self> {
        let stored = ElementType::from_bitpix(bitpix)?;
        if bscale.is_some_and(|s| s != 1.0) {
            return Ok(stored);
        }
        Ok(OFFSET_TYPES
            .into_iter()
            .find(|t| t.storage() == stored && bzero.is_some() && t.bzero() == bzero)
            .unwrap_or(stored))
    }

    pub fn bitpix(self) -> i64 {
        match self {
            ElementType::U8 | ElementType::I8 => 8,
            ElementType::I16 | ElementType::U16 => 16,
            ElementType::I32 | ElementType::U32 => 32,
            ElementType::I64 | ElementType::U64 => 64,
            ElementType::F32 => -32,
            ElementType::F64 => -64,
        }
    }

    /// The type samples are stored and compressed as.
    pub fn storage(self) -> ElementType {
        match self {
            ElementType::I8 => ElementType::U8,
            ElementType::U16 => ElementType::I16,
            ElementType::U32 => ElementType::I32,
            ElementType::U64 => ElementType::I64,
            other => other,
        }
    }

    /// `BZERO` that maps stored values onto this type, for offset types.
    pub fn bzero(self) -> Option<f64> {
        match self {
            ElementType::I8 => Some(-128.0),
            ElementType::U16 => Some(32768.0),
            ElementType::U32 => Some(2_147_483_648.0),
            ElementType::U64 => Some(9_223_372_036_854_775_808.0),
            _ => None,
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }
}

/// Image samples, one variant per [`ElementType`].
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Apply the same expression to whichever vector an [`ImageData`] holds,
/// rebuilding the same variant.
macro_rules! map_samples {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ImageData::U8($v) => ImageData::U8($body),
            ImageData::I8($v) => ImageData::I8($body),
            ImageData::I16($v) => ImageData::I16($body),
            ImageData::U16($v) => ImageData::U16($body),
            ImageData::I32($v) => ImageData::I32($body),
            ImageData::U32($v) => ImageData::U32($body),
            ImageData::I64($v) => ImageData::I64($body),
            ImageData::U64($v) => ImageData::U64($body),
            ImageData::F32($v) => ImageData::F32($body),
            ImageData::F64($v) => ImageData::F64($body),
        }
    };
}

/// Evaluate the same expression on whichever vector an [`ImageData`] holds.
macro_rules! with_samples {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ImageData::U8($v) => $body,
            ImageData::I8($v) => $body,
            ImageData::I16($v) => $body,
            ImageData::U16($v) => $body,
            ImageData::I32($v) => $body,
            ImageData::U32($v) => $body,
            ImageData::I64($v) => $body,
            ImageData::U64($v) => $body,
            ImageData::F32($v) => $body,
            ImageData::F64($v) => $body,
        }
    };
}

pub(crate) use map_samples;

impl ImageData {
    /// A zero-filled buffer of `len` samples.
    pub fn zeros(element_type: ElementType, len: usize) -> ImageData {
        match element_type {
            ElementType::U8 => ImageData::U8(vec![0; len]),
            ElementType::I8 => ImageData::I8(vec![0; len]),
            ElementType::I16 => ImageData::I16(vec![0; len]),
            ElementType::U16 => ImageData::U16(vec![0; len]),
            ElementType::I32 => ImageData::I32(vec![0; len]),
            ElementType::U32 => ImageData::U32(vec![0; len]),
            ElementType::I64 => ImageData::I64(vec![0; len]),
            ElementType::U64 => ImageData::U64(vec![0; len]),
            ElementType::F32 => ImageData::F32(vec![0.0; len]),
            ElementType::F64 => ImageData::F64(vec![0.0; len]),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ImageData::U8(_) => ElementType::U8,
            ImageData::I8(_) => ElementType::I8,
            ImageData::I16(_) => ElementType::I16,
            ImageData::U16(_) => ElementType::U16,
            ImageData::I32(_) => ElementType::I32,
            ImageData::U32(_) => ElementType::U32,
            ImageData::I64(_) => ElementType::I64,
            ImageData::U64(_) => ElementType::U64,
            ImageData::F32(_) => ElementType::F32,
            ImageData::F64(_) => ElementType::F64,
        }
    }

    pub fn len(&self) -> usize {
        with_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Big-endian bytes of the sample values.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        with_samples!(self, v => encode_be(v))
    }

    /// Decode big-endian bytes; the byte count must match `len` samples.
    pub fn from_be_bytes(element_type: ElementType, bytes: &[u8], len: usize) -> Result<ImageData> {
        if bytes.len() != len * element_type.size() {
            return Err(Error::DecompressionError("tile byte count does not match its shape"));
        }
        Ok(match element_type {
            ElementType::U8 => ImageData::U8(bytes.to_vec()),
            ElementType::I8 => ImageData::I8(decode_be(bytes)),
            ElementType::I16 => ImageData::I16(decode_be(bytes)),
            ElementType::U16 => ImageData::U16(decode_be(bytes)),
            ElementType::I32 => ImageData::I32(decode_be(bytes)),
            ElementType::U32 => ImageData::U32(decode_be(bytes)),
            ElementType::I64 => ImageData::I64(decode_be(bytes)),
            ElementType::U64 => ImageData::U64(decode_be(bytes)),
            ElementType::F32 => ImageData::F32(decode_be(bytes)),
            ElementType::F64 => ImageData::F64(decode_be(bytes)),
        })
    }

    /// Copy of the samples in `range`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> ImageData {
        map_samples!(self, v => v[range].to_vec())
    }

    /// Integer samples widened to `i64`; `None` for float data and for
    /// `u64` samples past `i64::MAX`.
    pub fn to_i64(&self) -> Option<Vec<i64>> {
        match self {
            ImageData::U8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::I8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::I16(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::U16(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::I32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::U32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            ImageData::I64(v) => Some(v.clone()),
            ImageData::U64(v) => v.iter().map(|&x| i64::try_from(x).ok()).collect(),
            ImageData::F32(_) | ImageData::F64(_) => None,
        }
    }

    /// Narrow `i64` samples back to an integer element type.
    ///
    /// Values outside the target range are an error, not a wrap.
    pub fn from_i64(element_type: ElementType, values: &[i64]) -> Result<ImageData> {
        fn narrow<T: TryFrom<i64>>(values: &[i64]) -> Result<Vec<T>> {
            values
                .iter()
                .map(|&x| T::try_from(x).map_err(|_| Error::DecompressionError("decoded value out of range")))
                .collect()
        }
        match element_type {
            ElementType::U8 => Ok(ImageData::U8(narrow(values)?)),
            ElementType::I8 => Ok(ImageData::I8(narrow(values)?)),
            ElementType::I16 => Ok(ImageData::I16(narrow(values)?)),
            ElementType::U16 => Ok(ImageData::U16(narrow(values)?)),
            ElementType::I32 => Ok(ImageData::I32(narrow(values)?)),
            ElementType::U32 => Ok(ImageData::U32(narrow(values)?)),
            ElementType::I64 => Ok(ImageData::I64(values.to_vec())),
            ElementType::U64 => Ok(ImageData::U64(narrow(values)?)),
            ElementType::F32 | ElementType::F64 => Err(Error::UnsupportedAlgorithm(
                format!("integer codec output for BITPIX {}", element_type.bitpix()),
            )),
        }
    }

    /// Float samples widened to `f64`; `None` for integer data.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ImageData::F32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            ImageData::F64(v) => Some(v.clone()),
            _ => None,
        }
    }
    /// The samples as their stored type: offset types are shifted by their
    /// `BZERO`, stored types are borrowed unchanged.
    pub fn to_storage(&self) -> Cow<'_, ImageData> {
        match self {
            ImageData::I8(v) => Cow::Owned(ImageData::U8(v.iter().map(|&x| (x as u8) ^ 0x80).collect())),
            ImageData::U16(v) => Cow::Owned(ImageData::I16(v.iter().map(|&x| (x ^ 0x8000) as i16).collect())),
            ImageData::U32(v) => Cow::Owned(ImageData::I32(v.iter().map(|&x| (x ^ 0x8000_0000) as i32).collect())),
            ImageData::U64(v) => Cow::Owned(ImageData::I64(v.iter().map(|&x| (x ^ (1 << 63)) as i64).collect())),
            stored => Cow::Borrowed(stored),
        }
    }

    /// Reverse of [`ImageData::to_storage`]: reinterpret stored samples as
    /// `element_type`.
    pub fn into_type(self, element_type: ElementType) -> Result<ImageData> {
        if self.element_type() == element_type {
            return Ok(self);
        }
        match (self, element_type) {
            (ImageData::U8(v), ElementType::I8) => Ok(ImageData::I8(v.into_iter().map(|x| (x ^ 0x80) as i8).collect())),
            (ImageData::I16(v), ElementType::U16) => Ok(ImageData::U16(v.into_iter().map(|x| (x as u16) ^ 0x8000).collect())),
            (ImageData::I32(v), ElementType::U32) => {
                Ok(ImageData::U32(v.into_iter().map(|x| (x as u32) ^ 0x8000_0000).collect()))
            }
            (ImageData::I64(v), ElementType::U64) => {
                Ok(ImageData::U64(v.into_iter().map(|x| (x as u64) ^ (1 << 63)).collect()))
            }
            _ => Err(Error::InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitpix_round_trip() {
        for bitpix in [8, 16, 32, 64, -32, -64] {
            assert_eq!(ElementType::from_bitpix(bitpix).unwrap().bitpix(), bitpix);
        }
        assert!(matches!(
            ElementType::from_bitpix(24),
            Err(Error::InvalidBitpix(24))
        ));
    }

    #[test]
    fn bzero_selects_offset_types() {
        assert_eq!(ElementType::from_scaling(16, Some(32768.0), None).unwrap(), ElementType::U16);
        assert_eq!(ElementType::from_scaling(8, Some(-128.0), Some(1.0)).unwrap(), ElementType::I8);
        assert_eq!(ElementType::from_scaling(32, Some(2_147_483_648.0), None).unwrap(), ElementType::U32);
        assert_eq!(ElementType::from_scaling(64, Some(9.223372036854775808e18), None).unwrap(), ElementType::U64);
        assert_eq!(ElementType::from_scaling(16, Some(32768.0), Some(2.0)).unwrap(), ElementType::I16);
        assert_eq!(ElementType::from_scaling(16, Some(100.0), None).unwrap(), ElementType::I16);
        assert_eq!(ElementType::from_scaling(32, None, None).unwrap(), ElementType::I32);
        assert_eq!(ElementType::from_scaling(-32, Some(32768.0), None).unwrap(), ElementType::F32);
    }

    #[test]
    fn storage_shift_round_trip() {
        let data = ImageData::U16(vec![0, 1, 32767, 32768, 65535]);
        let stored = data.to_storage();
        assert_eq!(*stored, ImageData::I16(vec![-32768, -32767, -1, 0, 32767]));
        assert_eq!(stored.into_owned().into_type(ElementType::U16).unwrap(), data);

        let data = ImageData::I8(vec![-128, -1, 0, 127]);
        assert_eq!(*data.to_storage(), ImageData::U8(vec![0, 127, 128, 255]));

        let data = ImageData::U64(vec![0, u64::MAX, 1 << 63]);
        assert_eq!(*data.to_storage(), ImageData::I64(vec![i64::MIN, i64::MAX, 0]));
        assert!(matches!(ImageData::I32(vec![1]).to_storage(), Cow::Borrowed(_)));
        assert!(ImageData::I32(vec![1]).into_type(ElementType::U16).is_err());
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::U8.size(), 1);
        assert_eq!(ElementType::I16.size(), 2);
        assert_eq!(ElementType::F32.size(), 4);
        assert_eq!(ElementType::I64.size(), 8);
        assert_eq!(ElementType::U16.size(), 2);
        assert_eq!(ElementType::I8.storage(), ElementType::U8);
    }

    #[test]
    fn be_bytes_round_trip() {
        let data = ImageData::I16(vec![1, -2, 300]);
        let bytes = data.to_be_bytes();
        assert_eq!(bytes, [0, 1, 0xFF, 0xFE, 0x01, 0x2C]);
        assert_eq!(ImageData::from_be_bytes(ElementType::I16, &bytes, 3).unwrap(), data);
        assert!(ImageData::from_be_bytes(ElementType::I16, &bytes, 4).is_err());
    }

    #[test]
    fn narrowing_rejects_out_of_range() {
        assert!(ImageData::from_i64(ElementType::U8, &[0, 255]).is_ok());
        assert!(ImageData::from_i64(ElementType::U8, &[256]).is_err());
        assert!(ImageData::from_i64(ElementType::F32, &[1]).is_err());
    }

    #[test]
    fn slice_keeps_type() {
        let data = ImageData::F64(vec![0.5, 1.5, 2.5]);
        assert_eq!(data.slice(1..3), ImageData::F64(vec![1.5, 2.5]));
    }
}
