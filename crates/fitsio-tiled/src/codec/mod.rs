//! Compression algorithm registry.
//!
//! Maps an algorithm name, an element type and an optional quantization
//! method to the codec that compresses one tile. Lookup fails with
//! [`Error::UnsupportedAlgorithm`]; there is no silent fallback at this
//! level. The per-tile gzip fallback is decided by the tile operation.

pub(crate) mod bits;
pub mod gzip;
pub mod hcompress;
pub mod plio;
pub mod quantize;
pub mod rice;

use crate::array::{ElementType, ImageData};
use crate::error::{Error, Result};
use crate::value::Value;

pub use quantize::{QuantizeLevel, Quantization, Quantizer};

/// A stateless tile compressor.
///
/// `shape` is the tile shape in FITS order; codecs that only see a sample
/// stream use just its product.
pub trait TileCodec: Send + Sync {
    fn compress(&self, data: &ImageData, shape: &[usize]) -> Result<Vec<u8>>;
    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData>;
}

/// Tile compression algorithm, stored in `ZCMPTYPE` / `ZCTYPn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Rice1,
    Gzip1,
    Gzip2,
    Plio1,
    Hcompress1,
    NoCompress,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::Rice1,
        Algorithm::Gzip1,
        Algorithm::Gzip2,
        Algorithm::Plio1,
        Algorithm::Hcompress1,
        Algorithm::NoCompress,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Rice1 => "RICE_1",
            Algorithm::Gzip1 => "GZIP_1",
            Algorithm::Gzip2 => "GZIP_2",
            Algorithm::Plio1 => "PLIO_1",
            Algorithm::Hcompress1 => "HCOMPRESS_1",
            Algorithm::NoCompress => "NOCOMPRESS",
        }
    }

    pub fn from_name(name: &str) -> Result<Algorithm> {
        match name.trim().to_ascii_uppercase().as_str() {
            "RICE_1" | "RICE_ONE" => Ok(Algorithm::Rice1),
            "GZIP_1" => Ok(Algorithm::Gzip1),
            "GZIP_2" => Ok(Algorithm::Gzip2),
            "PLIO_1" => Ok(Algorithm::Plio1),
            "HCOMPRESS_1" => Ok(Algorithm::Hcompress1),
            "NOCOMPRESS" => Ok(Algorithm::NoCompress),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Whether the codec can take samples of `element_type`, in their stored
    /// form.
    pub fn accepts(self, element_type: ElementType) -> bool {
        let element_type = element_type.storage();
        match self {
            Algorithm::Rice1 => matches!(element_type, ElementType::U8 | ElementType::I16 | ElementType::I32),
            Algorithm::Plio1 | Algorithm::Hcompress1 => !element_type.is_float(),
            Algorithm::Gzip1 | Algorithm::Gzip2 | Algorithm::NoCompress => true,
        }
    }

    /// Whether a tile is compared against gzip and replaced when not smaller.
    pub fn has_gzip_fallback(self) -> bool {
        !matches!(self, Algorithm::Gzip1 | Algorithm::NoCompress)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Algorithm::from_name(s)
    }
}

/// Algorithm parameters carried in `ZNAMEn` / `ZVALn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub rice_blocksize: usize,
    pub hcompress_scale: i32,
    pub hcompress_smooth: i32,
}

impl Default for CodecParams {
    fn default() -> Self {
        CodecParams {
            rice_blocksize: rice::DEFAULT_BLOCKSIZE,
            hcompress_scale: 0,
            hcompress_smooth: 0,
        }
    }
}

impl CodecParams {
    /// `(ZNAMEn, ZVALn)` pairs for `algorithm` applied to `element_type`.
    pub fn to_pairs(&self, algorithm: Algorithm, element_type: ElementType) -> Vec<(&'static str, Value)> {
        match algorithm {
            Algorithm::Rice1 => vec![
                ("BLOCKSIZE", Value::Integer(self.rice_blocksize as i64)),
                ("BYTEPIX", Value::Integer(element_type.size() as i64)),
            ],
            Algorithm::Hcompress1 => vec![
                ("SCALE", Value::Integer(i64::from(self.hcompress_scale))),
                ("SMOOTH", Value::Integer(i64::from(self.hcompress_smooth))),
            ],
            _ => Vec::new(),
        }
    }

    /// Read parameters back from `(ZNAMEn, ZVALn)` pairs; unknown names
    /// are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Result<Self> {
        let mut params = CodecParams::default();
        for (name, value) in pairs {
            match name.trim().to_ascii_uppercase().as_str() {
                "BLOCKSIZE" => {
                    let v = value.as_int().ok_or(Error::InvalidValue)?;
                    params.rice_blocksize = usize::try_from(v).ok().filter(|&b| b > 0).ok_or(Error::InvalidValue)?;
                }
                "SCALE" => {
                    let v = value.as_float().ok_or(Error::InvalidValue)?;
                    params.hcompress_scale = v.round() as i32;
                }
                "SMOOTH" => {
                    params.hcompress_smooth = value.as_int().ok_or(Error::InvalidValue)? as i32;
                }
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Build the codec for `algorithm`.
pub fn codec(algorithm: Algorithm, params: &CodecParams) -> Box<dyn TileCodec> {
    match algorithm {
        Algorithm::Rice1 => Box::new(rice::RiceCodec {
            blocksize: params.rice_blocksize,
        }),
        Algorithm::Gzip1 => Box::new(gzip::GzipCodec),
        Algorithm::Gzip2 => Box::new(gzip::ShuffledGzipCodec),
        Algorithm::Plio1 => Box::new(plio::PlioCodec),
        Algorithm::Hcompress1 => Box::new(hcompress::HcompressCodec {
            scale: params.hcompress_scale,
            smooth: params.hcompress_smooth,
        }),
        Algorithm::NoCompress => Box::new(gzip::RawCodec),
    }
}

/// The codecs resolved for one orchestrator call.
pub struct CodecSelection {
    pub algorithm: Algorithm,
    /// Primary codec; runs on `codec_type` samples.
    pub codec: Box<dyn TileCodec>,
    /// Element type the primary codec sees: `I32` for quantized floats.
    pub codec_type: ElementType,
    /// Quantization applied before the primary codec, floats only.
    pub quantize: Option<Quantization>,
    /// Whether tiles are compared against (and may switch to) gzip.
    pub gzip_fallback: bool,
    /// Lossless codec for `GZIP_COMPRESSED_DATA`.
    pub gzip: gzip::GzipCodec,
    /// Codec for `UNCOMPRESSED_DATA`.
    pub raw: gzip::RawCodec,
}

impl std::fmt::Debug for CodecSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecSelection")
            .field("algorithm", &self.algorithm)
            .field("codec_type", &self.codec_type)
            .field("quantize", &self.quantize)
            .field("gzip_fallback", &self.gzip_fallback)
            .finish()
    }
}

/// Resolve the codec for `element_type` samples.
///
/// Quantization is ignored for integer input. Float input with an
/// integer-only algorithm needs a quantization method.
pub fn select(
    element_type: ElementType,
    algorithm: Algorithm,
    quantize: Option<Quantization>,
    params: &CodecParams,
) -> Result<CodecSelection> {
    let quantize = if element_type.is_float() { quantize } else { None };
    let codec_type = if quantize.is_some() { ElementType::I32 } else { element_type.storage() };
    if !algorithm.accepts(codec_type) {
        let what = if element_type.is_float() {
            format!("{algorithm} for BITPIX {} without quantization", element_type.bitpix())
        } else {
            format!("{algorithm} for BITPIX {}", element_type.bitpix())
        };
        return Err(Error::UnsupportedAlgorithm(what));
    }
    log::debug!(
        "codec {algorithm} for BITPIX {} (quantize: {:?})",
        element_type.bitpix(),
        quantize.map(Quantization::name)
    );
    Ok(CodecSelection {
        algorithm,
        codec: codec(algorithm, params),
        codec_type,
        quantize,
        gzip_fallback: algorithm.has_gzip_fallback(),
        gzip: gzip::GzipCodec,
        raw: gzip::RawCodec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for algorithm in Algorithm::ALL {
            assert_eq!(Algorithm::from_name(algorithm.name()).unwrap(), algorithm);
        }
        assert_eq!("rice_one".parse::<Algorithm>().unwrap(), Algorithm::Rice1);
        assert!(matches!(
            Algorithm::from_name("LZMA_9"),
            Err(Error::UnsupportedAlgorithm(name)) if name == "LZMA_9"
        ));
    }

    #[test]
    fn rice_rejects_i64_and_unquantized_floats() {
        let params = CodecParams::default();
        assert!(select(ElementType::I64, Algorithm::Rice1, None, &params).is_err());
        assert!(select(ElementType::F32, Algorithm::Rice1, None, &params).is_err());
        assert!(select(ElementType::F32, Algorithm::Hcompress1, None, &params).is_err());
        let sel = select(ElementType::F32, Algorithm::Rice1, Some(Quantization::SubtractiveDither1), &params).unwrap();
        assert_eq!(sel.codec_type, ElementType::I32);
        assert!(sel.gzip_fallback);
    }

    #[test]
    fn quantization_is_ignored_for_integers() {
        let sel = select(
            ElementType::I16,
            Algorithm::Plio1,
            Some(Quantization::NoDither),
            &CodecParams::default(),
        )
        .unwrap();
        assert_eq!(sel.quantize, None);
        assert_eq!(sel.codec_type, ElementType::I16);
    }

    #[test]
    fn gzip_accepts_everything() {
        for ty in [ElementType::U8, ElementType::I64, ElementType::F64] {
            let sel = select(ty, Algorithm::Gzip1, None, &CodecParams::default()).unwrap();
            assert!(!sel.gzip_fallback);
        }
        assert!(!Algorithm::NoCompress.has_gzip_fallback());
        assert!(Algorithm::Gzip2.has_gzip_fallback());
    }

    #[test]
    fn params_pairs() {
        let params = CodecParams {
            rice_blocksize: 16,
            ..CodecParams::default()
        };
        let pairs = params.to_pairs(Algorithm::Rice1, ElementType::I16);
        assert_eq!(pairs[0], ("BLOCKSIZE", Value::Integer(16)));
        assert_eq!(pairs[1], ("BYTEPIX", Value::Integer(2)));
        let back = CodecParams::from_pairs(pairs.iter().map(|(n, v)| (*n, v))).unwrap();
        assert_eq!(back, params);
        assert!(params.to_pairs(Algorithm::Gzip2, ElementType::I16).is_empty());
    }

    #[test]
    fn selected_codec_round_trips() {
        let data = ImageData::I32((0..64).map(|i| i * 3).collect());
        for algorithm in Algorithm::ALL {
            let sel = select(ElementType::I32, algorithm, None, &CodecParams::default()).unwrap();
            let packed = sel.codec.compress(&data, &[8, 8]).unwrap();
            assert_eq!(sel.codec.decompress(&packed, ElementType::I32, &[8, 8]).unwrap(), data);
        }
    }
}
