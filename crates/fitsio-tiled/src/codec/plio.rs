//! PLIO_1: IRAF pixel-list line-list encoding.
//!
//! A tile becomes a list of 16-bit instruction words (big-endian on disk)
//! preceded by a 7-word header. Each word holds a 3-bit opcode and 12 bits
//! of data: zero runs, high-value runs, changes to the current value and
//! single-pixel emits. Only non-negative values below 2^24 are encodable.

use super::TileCodec;
use crate::array::{ElementType, ImageData};
use crate::endian::{decode_be, encode_be};
use crate::error::{Error, Result};

/// Exclusive upper bound of encodable pixel values.
pub const PLIO_MAX_VALUE: i64 = 1 << 24;

const HEADER_WORDS: usize = 7;
const MAX_RUN: i64 = 4095;

/// Encode one line of non-negative pixels.
fn encode_line(px: &[i32]) -> Vec<i16> {
    let mut ll: Vec<i32> = vec![0, HEADER_WORDS as i32, -100, 0, 0, 0, 0];
    let n = px.len();
    if n > 0 {
        let xe = n - 1;
        let mut pv = px[0].max(0);
        let mut nv = 0;
        let mut x1 = 0usize;
        let mut iz = 0usize;
        let mut hi = 1;

        for ip in 0..n {
            if ip < xe {
                nv = px[ip + 1].max(0);
                if nv == pv {
                    continue;
                }
                if pv == 0 {
                    pv = nv;
                    x1 = ip + 1;
                    continue;
                }
            } else if pv == 0 {
                x1 = n;
            }

            let mut np = (ip + 1 - x1) as i64;
            let mut nz = (x1 - iz) as i64;
            'emit: {
                if pv > 0 {
                    let dv = pv - hi;
                    if dv != 0 {
                        hi = pv;
                        if dv.abs() > 4095 {
                            ll.push((pv & 4095) + 4096);
                            ll.push(pv / 4096);
                        } else {
                            ll.push(if dv < 0 { -dv + 12288 } else { dv + 8192 });
                            if np == 1 && nz == 0 {
                                // Fold the single pixel into the set-value word.
                                if let Some(last) = ll.last_mut() {
                                    *last |= 16384;
                                }
                                break 'emit;
                            }
                        }
                    }
                }
                if nz > 0 {
                    while nz > 0 {
                        ll.push(nz.min(MAX_RUN) as i32);
                        nz -= MAX_RUN;
                    }
                    // A zero run followed by one pixel becomes a single
                    // opcode-5 word, unless the run word is already full.
                    if np == 1 && pv > 0 {
                        if let Some(last) = ll.last_mut() {
                            if i64::from(*last) < MAX_RUN {
                                *last += 20481;
                                break 'emit;
                            }
                        }
                    }
                }
                while np > 0 {
                    ll.push(np.min(MAX_RUN) as i32 + 16384);
                    np -= MAX_RUN;
                }
            }
            x1 = ip + 1;
            iz = x1;
            pv = nv;
        }
    }

    let len = ll.len() as i32;
    ll[3] = len % 32768;
    ll[4] = len / 32768;
    ll.into_iter().map(|w| w as i16).collect()
}

/// Decode a line list into `npix` pixels.
fn decode_line(ll: &[i16], npix: usize) -> Result<Vec<i32>> {
    let corrupt = Error::DecompressionError("corrupt PLIO line list");
    if ll.len() < 3 {
        return Err(corrupt);
    }
    let (lllen, first) = if ll[2] > 0 {
        // Old-style header: length in word 3, data from word 4.
        (ll[2] as usize, 3usize)
    } else {
        if ll.len() < 5 {
            return Err(corrupt);
        }
        let len = (i32::from(ll[4]) << 15) + i32::from(ll[3]);
        let first = usize::try_from(ll[1]).map_err(|_| Error::DecompressionError("corrupt PLIO header"))?;
        (usize::try_from(len).map_err(|_| Error::DecompressionError("corrupt PLIO header"))?, first)
    };
    if lllen > ll.len() {
        return Err(Error::DecompressionError("PLIO line list is truncated"));
    }

    let mut out = vec![0i32; npix];
    let xe = npix as i64;
    let mut x1: i64 = 1;
    let mut op = 0usize;
    let mut pv: i32 = 1;
    let mut skip = false;

    for ip in first..lllen {
        if x1 > xe {
            break;
        }
        if skip {
            skip = false;
            continue;
        }
        let word = i32::from(ll[ip]);
        if word < 0 {
            return Err(Error::DecompressionError("invalid PLIO opcode"));
        }
        let opcode = word / 4096;
        let data = word & 4095;
        match opcode {
            0 | 4 | 5 => {
                let x2 = x1 + i64::from(data) - 1;
                let i1 = x1.max(1);
                let i2 = x2.min(xe);
                let np = i2 - i1 + 1;
                if np > 0 {
                    let otop = op + np as usize - 1;
                    let fill = if opcode == 4 { pv } else { 0 };
                    out[op..=otop].fill(fill);
                    if opcode == 5 && i2 == x2 {
                        out[otop] = pv;
                    }
                    op = otop + 1;
                }
                x1 = x2 + 1;
            }
            1 => {
                let high = *ll.get(ip + 1).ok_or(Error::DecompressionError("PLIO line list is truncated"))?;
                pv = (i32::from(high) << 12) + data;
                skip = true;
            }
            2 => pv += data,
            3 => pv -= data,
            6 | 7 => {
                pv = if opcode == 6 { pv + data } else { pv - data };
                if x1 >= 1 && x1 <= xe {
                    out[op] = pv;
                    op += 1;
                }
                x1 += 1;
            }
            _ => return Err(Error::DecompressionError("invalid PLIO opcode")),
        }
    }
    Ok(out)
}

/// `PLIO_1` codec for integer tiles with values in `0..2^24`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlioCodec;

impl TileCodec for PlioCodec {
    fn compress(&self, data: &ImageData, _shape: &[usize]) -> Result<Vec<u8>> {
        let values = data.to_i64().ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!(
                "PLIO_1 for BITPIX {}",
                data.element_type().bitpix()
            ))
        })?;
        if values.iter().any(|v| !(0..PLIO_MAX_VALUE).contains(v)) {
            return Err(Error::CompressionError("PLIO_1 needs values in 0..2^24"));
        }
        let px: Vec<i32> = values.iter().map(|&v| v as i32).collect();
        Ok(encode_be(&encode_line(&px)))
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        let words: Vec<i16> = decode_be(bytes);
        let px = decode_line(&words, shape.iter().product())?;
        let values: Vec<i64> = px.into_iter().map(i64::from).collect();
        ImageData::from_i64(element_type, &values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(px: &[i32]) -> Vec<i32> {
        decode_line(&encode_line(px), px.len()).unwrap()
    }

    #[test]
    fn header_records_length() {
        let ll = encode_line(&[0, 0, 5, 5, 0]);
        assert_eq!(&ll[..3], &[0, 7, -100]);
        assert_eq!(ll[3] as usize, ll.len());
        // set value 5, two zeros, two fives, one zero
        assert_eq!(&ll[7..], &[8196, 2, 16386, 1]);
    }

    #[test]
    fn simple_runs() {
        for px in [
            vec![0, 0, 5, 5, 0],
            vec![1, 1, 1, 1],
            vec![0; 10],
            vec![3],
            vec![0, 7],
            vec![9, 0, 0, 9, 0, 9],
        ] {
            assert_eq!(round_trip(&px), px);
        }
    }

    #[test]
    fn large_values_and_jumps() {
        let px = vec![0, 16_000_000, 16_000_000, 2, 4097, 0, 0, 1 << 23];
        assert_eq!(round_trip(&px), px);
    }

    #[test]
    fn long_runs_split_at_4095() {
        let mut px = vec![0; 9000];
        px.extend(vec![4; 5000]);
        px.push(0);
        assert_eq!(round_trip(&px), px);
    }

    #[test]
    fn full_zero_chunk_then_single_pixel() {
        let mut px = vec![0; 4095];
        px.push(12);
        px.extend(vec![0; 3]);
        assert_eq!(round_trip(&px), px);
    }

    #[test]
    fn codec_rejects_out_of_range() {
        let neg = ImageData::I32(vec![0, -1, 2]);
        assert!(matches!(PlioCodec.compress(&neg, &[3]), Err(Error::CompressionError(_))));
        let big = ImageData::I32(vec![1 << 24]);
        assert!(matches!(PlioCodec.compress(&big, &[1]), Err(Error::CompressionError(_))));
        let float = ImageData::F32(vec![1.0]);
        assert!(matches!(PlioCodec.compress(&float, &[1]), Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn codec_round_trip_i16() {
        let data = ImageData::I16((0..400).map(|i| ((i / 37) % 3 * 100) as i16).collect());
        let packed = PlioCodec.compress(&data, &[20, 20]).unwrap();
        assert_eq!(PlioCodec.decompress(&packed, ElementType::I16, &[20, 20]).unwrap(), data);
    }

    #[test]
    fn truncated_list_is_an_error() {
        let packed = encode_line(&[1, 2, 3, 4, 5]);
        assert!(decode_line(&packed[..packed.len() - 2], 5).is_err());
    }
}
