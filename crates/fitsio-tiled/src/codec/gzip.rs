//! GZIP_1 and GZIP_2 tile codecs.
//!
//! GZIP_1 writes a single gzip member (RFC 1952) around a raw deflate stream.
//! GZIP_2 first shuffles the big-endian sample bytes so that all most
//! significant bytes come first, then gzips the result.

use super::TileCodec;
use crate::array::{ElementType, ImageData};
use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFLATE_LEVEL: u8 = 6;

/// Wrap `data` in a gzip member.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let deflated = miniz_oxide::deflate::compress_to_vec(data, DEFLATE_LEVEL);
    let mut out = Vec::with_capacity(deflated.len() + 18);
    // ID1 ID2 CM FLG, MTIME, XFL, OS (unknown)
    out.extend_from_slice(&[GZIP_MAGIC[0], GZIP_MAGIC[1], 0x08, 0x00]);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&[0x00, 0xff]);
    out.extend_from_slice(&deflated);
    out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

/// Strip the gzip header and trailer, returning the raw deflate payload.
fn strip_gzip_header(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 18 || data[..2] != GZIP_MAGIC || data[2] != 0x08 {
        return Err(Error::DecompressionError("bad gzip header"));
    }
    let flg = data[3];
    let mut pos = 10usize;
    if flg & 0x04 != 0 {
        // FEXTRA
        if pos + 2 > data.len() {
            return Err(Error::DecompressionError("bad gzip header"));
        }
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }
    for flag in [0x08, 0x10] {
        // FNAME, FCOMMENT: null-terminated strings
        if flg & flag != 0 {
            while pos < data.len() && data[pos] != 0 {
                pos += 1;
            }
            pos += 1;
        }
    }
    if flg & 0x02 != 0 {
        // FHCRC
        pos += 2;
    }
    if data.len() < pos + 8 {
        return Err(Error::DecompressionError("truncated gzip member"));
    }
    Ok(&data[pos..data.len() - 8])
}

/// Inflate gzip, zlib or raw deflate data.
///
/// For gzip members the CRC32 and length in the trailer are verified.
pub fn gunzip(compressed: &[u8]) -> Result<Vec<u8>> {
    if compressed.starts_with(&GZIP_MAGIC) {
        let payload = strip_gzip_header(compressed)?;
        let out = miniz_oxide::inflate::decompress_to_vec(payload)
            .map_err(|_| Error::DecompressionError("corrupt deflate stream"))?;
        let trailer = &compressed[compressed.len() - 8..];
        let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
        if crc != crc32fast::hash(&out) || isize != out.len() as u32 {
            return Err(Error::DecompressionError("gzip checksum mismatch"));
        }
        return Ok(out);
    }
    miniz_oxide::inflate::decompress_to_vec_zlib(compressed)
        .or_else(|_| miniz_oxide::inflate::decompress_to_vec(compressed))
        .map_err(|_| Error::DecompressionError("corrupt deflate stream"))
}

/// Regroup bytes of `width`-byte elements: every element's first byte, then
/// every element's second byte, and so on.
pub fn shuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    if width <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / width;
    let mut out = vec![0u8; bytes.len()];
    for (i, element) in bytes.chunks_exact(width).enumerate() {
        for (b, &byte) in element.iter().enumerate() {
            out[b * n + i] = byte;
        }
    }
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    if width <= 1 {
        return bytes.to_vec();
    }
    let n = bytes.len() / width;
    let mut out = vec![0u8; bytes.len()];
    for (i, element) in out.chunks_exact_mut(width).enumerate() {
        for (b, byte) in element.iter_mut().enumerate() {
            *byte = bytes[b * n + i];
        }
    }
    out
}

fn sample_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// `GZIP_1`: gzip over the big-endian sample bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl TileCodec for GzipCodec {
    fn compress(&self, data: &ImageData, _shape: &[usize]) -> Result<Vec<u8>> {
        Ok(gzip(&data.to_be_bytes()))
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        let raw = gunzip(bytes)?;
        ImageData::from_be_bytes(element_type, &raw, sample_count(shape))
    }
}

/// `GZIP_2`: byte-shuffled gzip.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffledGzipCodec;

impl TileCodec for ShuffledGzipCodec {
    fn compress(&self, data: &ImageData, _shape: &[usize]) -> Result<Vec<u8>> {
        let width = data.element_type().size();
        Ok(gzip(&shuffle(&data.to_be_bytes(), width)))
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        let raw = unshuffle(&gunzip(bytes)?, element_type.size());
        ImageData::from_be_bytes(element_type, &raw, sample_count(shape))
    }
}

/// `NOCOMPRESS` and the `UNCOMPRESSED_DATA` column: plain big-endian bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl TileCodec for RawCodec {
    fn compress(&self, data: &ImageData, _shape: &[usize]) -> Result<Vec<u8>> {
        Ok(data.to_be_bytes())
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        ImageData::from_be_bytes(element_type, bytes, sample_count(shape))
    }
}
