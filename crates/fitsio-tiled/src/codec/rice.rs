//! RICE_1: adaptive Rice coding of first differences, in the `fits_rcomp`
//! bit layout.
//!
//! The first sample is written raw. Every block of `blocksize` differences
//! starts with an `fsbits`-wide code selecting the split level: 0 for an
//! all-zero block, `fsmax + 1` for raw differences, otherwise `fs + 1`
//! followed by unary high bits and `fs` low bits per difference.

use super::bits::{BitReader, BitWriter};
use super::TileCodec;
use crate::array::{ElementType, ImageData};
use crate::error::{Error, Result};

/// Default `BLOCKSIZE` compression parameter.
pub const DEFAULT_BLOCKSIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RiceParams {
    fsbits: u32,
    fsmax: u32,
    bbits: u32,
}

impl RiceParams {
    fn for_bytepix(bytepix: usize) -> Result<Self> {
        match bytepix {
            1 => Ok(RiceParams {
                fsbits: 3,
                fsmax: 6,
                bbits: 8,
            }),
            2 => Ok(RiceParams {
                fsbits: 4,
                fsmax: 14,
                bbits: 16,
            }),
            4 => Ok(RiceParams {
                fsbits: 5,
                fsmax: 25,
                bbits: 32,
            }),
            _ => Err(Error::UnsupportedAlgorithm(format!(
                "RICE_1 with BYTEPIX {bytepix}"
            ))),
        }
    }

    fn mask(&self) -> u32 {
        if self.bbits == 32 {
            u32::MAX
        } else {
            (1u32 << self.bbits) - 1
        }
    }

    /// Map the width-wrapped difference to an unsigned code.
    fn zigzag(&self, diff: u32) -> u32 {
        let shift = 32 - self.bbits;
        let signed = ((diff << shift) as i32) >> shift;
        if signed < 0 {
            !(signed << 1) as u32
        } else {
            (signed << 1) as u32
        }
    }
}

fn unzigzag(code: u32) -> u32 {
    if code & 1 == 0 {
        code >> 1
    } else {
        !(code >> 1)
    }
}

/// Rice-encode samples given as `bbits`-wide bit patterns.
fn rice_compress(pixels: &[u32], blocksize: usize, params: RiceParams) -> Vec<u8> {
    let mut out = BitWriter::with_capacity(pixels.len() * (params.bbits as usize / 8) / 2 + 8);
    let Some(&first) = pixels.first() else {
        return out.finish();
    };
    let mask = params.mask();
    out.write(first, params.bbits);

    let mut lastpix = first;
    let mut diffs = Vec::with_capacity(blocksize);
    for block in pixels.chunks(blocksize) {
        diffs.clear();
        let mut pixelsum = 0.0f64;
        for &nextpix in block {
            let diff = params.zigzag(nextpix.wrapping_sub(lastpix) & mask);
            pixelsum += f64::from(diff);
            diffs.push(diff);
            lastpix = nextpix;
        }

        let thisblock = block.len() as f64;
        let dpsum = ((pixelsum - (block.len() / 2) as f64 - 1.0) / thisblock).max(0.0);
        let mut psum = (dpsum as u32) >> 1;
        let mut fs = 0u32;
        while psum > 0 {
            psum >>= 1;
            fs += 1;
        }

        if fs >= params.fsmax {
            out.write(params.fsmax + 1, params.fsbits);
            for &diff in &diffs {
                out.write(diff, params.bbits);
            }
        } else if fs == 0 && pixelsum == 0.0 {
            out.write(0, params.fsbits);
        } else {
            out.write(fs + 1, params.fsbits);
            for &diff in &diffs {
                out.write_zeros((diff >> fs) as usize);
                out.write_bit(true);
                if fs > 0 {
                    out.write(diff, fs);
                }
            }
        }
    }
    out.finish()
}

/// Decode `num_pixels` samples; the result holds `bbits`-wide bit patterns.
fn rice_decompress(
    compressed: &[u8],
    num_pixels: usize,
    blocksize: usize,
    params: RiceParams,
) -> Result<Vec<u32>> {
    let mut output = Vec::with_capacity(num_pixels);
    if num_pixels == 0 {
        return Ok(output);
    }
    let mask = params.mask();
    let mut input = BitReader::new(compressed);
    let mut lastpix = input.read(params.bbits)?;

    while output.len() < num_pixels {
        let imax = (output.len() + blocksize).min(num_pixels);
        let code = input.read(params.fsbits)?;
        if code == 0 {
            // Low entropy: every difference in the block is zero.
            output.resize(imax, lastpix);
            continue;
        }
        let fs = code - 1;
        if fs > params.fsmax {
            return Err(Error::DecompressionError("invalid Rice split level"));
        }
        while output.len() < imax {
            let diff = if fs == params.fsmax {
                input.read(params.bbits)?
            } else {
                let top = input.read_unary()?;
                let low = if fs > 0 { input.read(fs)? } else { 0 };
                top.checked_shl(fs)
                    .ok_or(Error::DecompressionError("Rice code overflows"))?
                    | low
            };
            lastpix = lastpix.wrapping_add(unzigzag(diff)) & mask;
            output.push(lastpix);
        }
    }
    Ok(output)
}

/// `RICE_1` codec for 8, 16 and 32-bit integer tiles.
#[derive(Debug, Clone, Copy)]
pub struct RiceCodec {
    pub blocksize: usize,
}

impl Default for RiceCodec {
    fn default() -> Self {
        RiceCodec {
            blocksize: DEFAULT_BLOCKSIZE,
        }
    }
}

impl TileCodec for RiceCodec {
    fn compress(&self, data: &ImageData, _shape: &[usize]) -> Result<Vec<u8>> {
        let params = RiceParams::for_bytepix(data.element_type().size())?;
        let pixels: Vec<u32> = match data {
            ImageData::U8(v) => v.iter().map(|&x| u32::from(x)).collect(),
            ImageData::I16(v) => v.iter().map(|&x| u32::from(x as u16)).collect(),
            ImageData::I32(v) => v.iter().map(|&x| x as u32).collect(),
            _ => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "RICE_1 for BITPIX {}",
                    data.element_type().bitpix()
                )))
            }
        };
        Ok(rice_compress(&pixels, self.blocksize.max(1), params))
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        let params = RiceParams::for_bytepix(element_type.size())?;
        let n: usize = shape.iter().product();
        let pixels = rice_decompress(bytes, n, self.blocksize.max(1), params)?;
        match element_type {
            ElementType::U8 => Ok(ImageData::U8(pixels.iter().map(|&p| p as u8).collect())),
            ElementType::I16 => Ok(ImageData::I16(pixels.iter().map(|&p| p as u16 as i16).collect())),
            ElementType::I32 => Ok(ImageData::I32(pixels.iter().map(|&p| p as i32).collect())),
            other => Err(Error::UnsupportedAlgorithm(format!(
                "RICE_1 for BITPIX {}",
                other.bitpix()
            ))),
        }
    }
}
