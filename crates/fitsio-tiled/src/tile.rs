//! Tile operations: one unit of compression or decompression work.
//!
//! A [`TileOperation`] borrows its input when created, is submitted to the
//! pool, runs once, and ends either completed with a result or failed with
//! an error. [`run_all`] drives a batch on a [`TilePool`]; [`join`] collects
//! the results in tile order and reports the lowest failing tile.

use rayon::prelude::*;

use crate::array::{ElementType, ImageData};
use crate::codec::{CodecSelection, Quantizer, TileCodec};
use crate::error::{Error, Result};
use crate::geometry::{describe, TileArea};
use crate::mask::NullMask;
use crate::pool::TilePool;

/// Lifecycle of a tile operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Created,
    Submitted,
    Running,
    Completed,
    Failed,
}

/// How a tile ended up stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileEncoding {
    /// `COMPRESSED_DATA`, written by the selected algorithm.
    Compressed,
    /// `GZIP_COMPRESSED_DATA`: the algorithm failed or did not beat gzip.
    Gzip,
    /// `UNCOMPRESSED_DATA`: the tile touches a forced no-loss region.
    Uncompressed,
}

/// One tile's work item.
pub struct TileOperation<I, O> {
    index: usize,
    area: TileArea,
    input: I,
    state: TileState,
    result: Option<Result<O>>,
}

impl<I, O> TileOperation<I, O> {
    pub fn new(index: usize, area: TileArea, input: I) -> Self {
        TileOperation {
            index,
            area,
            input,
            state: TileState::Created,
            result: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn area(&self) -> &TileArea {
        &self.area
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn submit(&mut self) {
        if self.state == TileState::Created {
            self.state = TileState::Submitted;
        }
    }

    /// Run the work function once. Later calls are ignored.
    pub fn run<F>(&mut self, work: F)
    where
        F: FnOnce(usize, &TileArea, &I) -> Result<O>,
    {
        if matches!(self.state, TileState::Completed | TileState::Failed | TileState::Running) {
            return;
        }
        self.state = TileState::Running;
        let result = work(self.index, &self.area, &self.input);
        self.state = if result.is_ok() {
            TileState::Completed
        } else {
            TileState::Failed
        };
        self.result = Some(result);
    }

    /// The result, once the operation has run.
    pub fn result(&self) -> Option<&Result<O>> {
        self.result.as_ref()
    }

    /// Take the result, tagging a failure with the tile index.
    pub fn into_result(self) -> Result<O> {
        match self.result {
            Some(Ok(out)) => Ok(out),
            Some(Err(e)) => Err(e.in_tile(self.index)),
            None => Err(Error::CompressionError("tile operation never ran").in_tile(self.index)),
        }
    }
}

/// Submit every operation and run them on `pool`, blocking until all are done.
///
/// A failing tile does not stop the others.
pub fn run_all<I, O, F>(pool: &TilePool, ops: &mut [TileOperation<I, O>], work: F)
where
    I: Send,
    O: Send,
    F: Fn(usize, &TileArea, &I) -> Result<O> + Sync,
{
    for op in ops.iter_mut() {
        op.submit();
    }
    pool.install(|| ops.par_iter_mut().for_each(|op| op.run(&work)));
}

/// Collect results in tile order; the failure with the lowest index wins.
pub fn join<I, O>(ops: Vec<TileOperation<I, O>>) -> Result<Vec<O>> {
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        out.push(op.into_result()?);
    }
    Ok(out)
}

// ── Compression ──

/// The stored form of one compressed tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedTile {
    pub encoding: TileEncoding,
    pub bytes: Vec<u8>,
    /// `(ZSCALE, ZZERO)` of a quantized tile.
    pub scaling: Option<(f64, f64)>,
    /// Compressed null mask, when the tile has nulls.
    pub mask: Option<Vec<u8>>,
}

/// Shared, read-only state for compressing the tiles of one image.
pub struct TileCompressor<'a> {
    pub selection: &'a CodecSelection,
    pub quantizer: Option<Quantizer>,
    /// `BLANK` of integer images.
    pub null_value: Option<i64>,
    pub mask_codec: &'a dyn TileCodec,
    pub no_loss: &'a [TileArea],
}

impl TileCompressor<'_> {
    pub fn compress(&self, index: usize, area: &TileArea, samples: &ImageData) -> Result<CompressedTile> {
        let shape = area.shape();
        let mask = match self.null_value.and_then(|blank| NullMask::detect(samples, blank)) {
            Some(mask) => Some(mask.compress(self.mask_codec, &shape)?),
            None => None,
        };

        if self.no_loss.iter().any(|region| region.intersects(area)) {
            return Ok(CompressedTile {
                encoding: TileEncoding::Uncompressed,
                bytes: self.selection.raw.compress(samples, &shape)?,
                scaling: None,
                mask,
            });
        }

        let primary = match (self.selection.quantize, &self.quantizer) {
            (Some(_), Some(quantizer)) => {
                let floats = samples.to_f64().ok_or(Error::InvalidValue)?;
                match quantizer.quantize(&floats, index) {
                    Some(tile) => self
                        .selection
                        .codec
                        .compress(&ImageData::I32(tile.values), &shape)
                        .map(|bytes| (bytes, Some((tile.scale, tile.zero)))),
                    None => Err(Error::CompressionError("tile cannot be quantized")),
                }
            }
            _ => self.selection.codec.compress(samples, &shape).map(|bytes| (bytes, None)),
        };

        let raw_size = samples.len() * samples.element_type().size();
        let primary = match primary {
            Ok((bytes, _)) if self.selection.gzip_fallback && bytes.len() >= raw_size => Err(Error::CompressionError(
                "output is not smaller than the raw tile",
            )),
            other => other,
        };

        match primary {
            Ok((bytes, scaling)) => {
                if self.selection.gzip_fallback {
                    let gzipped = self.selection.gzip.compress(samples, &shape)?;
                    if bytes.len() >= gzipped.len() {
                        log::warn!(
                            "tile {index} {}: {} gave {} bytes, gzip {}; using gzip",
                            describe(area),
                            self.selection.algorithm,
                            bytes.len(),
                            gzipped.len()
                        );
                        return Ok(CompressedTile {
                            encoding: TileEncoding::Gzip,
                            bytes: gzipped,
                            scaling: None,
                            mask,
                        });
                    }
                }
                Ok(CompressedTile {
                    encoding: TileEncoding::Compressed,
                    bytes,
                    scaling,
                    mask,
                })
            }
            Err(Error::CompressionError(why)) => {
                log::warn!("tile {index} {} stored with gzip: {why}", describe(area));
                Ok(CompressedTile {
                    encoding: TileEncoding::Gzip,
                    bytes: self.selection.gzip.compress(samples, &shape)?,
                    scaling: None,
                    mask,
                })
            }
            Err(e) => Err(e),
        }
    }
}

// ── Decompression ──

/// The cells of one compressed-table row.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileCells<'a> {
    pub compressed: &'a [u8],
    pub gzip: &'a [u8],
    pub uncompressed: &'a [u8],
    pub mask: &'a [u8],
    /// Per-tile `(ZSCALE, ZZERO)` columns.
    pub scaling: Option<(f64, f64)>,
    /// Per-tile `ZBLANK` column.
    pub blank: Option<i32>,
}

/// Shared, read-only state for decompressing the tiles of one image.
pub struct TileDecompressor<'a> {
    pub selection: &'a CodecSelection,
    /// Element type of the restored image.
    pub element_type: ElementType,
    pub quantizer: Option<Quantizer>,
    pub null_value: Option<i64>,
    pub mask_codec: &'a dyn TileCodec,
}

impl TileDecompressor<'_> {
    pub fn decompress(&self, index: usize, area: &TileArea, cells: &TileCells<'_>) -> Result<ImageData> {
        let shape = area.shape();
        let mut samples = if !cells.compressed.is_empty() {
            let coded = self.selection.codec.decompress(cells.compressed, self.selection.codec_type, &shape)?;
            match (&self.quantizer, self.selection.quantize) {
                (Some(quantizer), Some(_)) => self.dequantize(quantizer, &coded, cells, index)?,
                _ => coded,
            }
        } else if !cells.gzip.is_empty() {
            self.selection.gzip.decompress(cells.gzip, self.element_type, &shape)?
        } else if !cells.uncompressed.is_empty() {
            self.selection.raw.decompress(cells.uncompressed, self.element_type, &shape)?
        } else if area.is_empty() {
            ImageData::zeros(self.element_type, 0)
        } else {
            return Err(Error::DecompressionError("tile has no data cell"));
        };

        if let (Some(blank), false) = (self.null_value, cells.mask.is_empty()) {
            let mask = NullMask::decompress(cells.mask, self.mask_codec, &shape)?;
            mask.apply(&mut samples, blank)?;
        }
        Ok(samples)
    }

    fn dequantize(
        &self,
        quantizer: &Quantizer,
        coded: &ImageData,
        cells: &TileCells<'_>,
        index: usize,
    ) -> Result<ImageData> {
        let ImageData::I32(values) = coded else {
            return Err(Error::DecompressionError("quantized tile is not 32-bit"));
        };
        let (scale, zero) = match (cells.scaling, quantizer.level) {
            (Some(scaling), _) => scaling,
            (None, crate::codec::QuantizeLevel::Fixed { scale, zero }) => (scale, zero),
            (None, _) => return Err(Error::MissingKeyword("ZSCALE".into())),
        };
        let quantizer = Quantizer {
            blank: cells.blank.unwrap_or(quantizer.blank),
            ..*quantizer
        };
        let floats = quantizer.dequantize(values, scale, zero, index);
        match self.element_type {
            ElementType::F32 => Ok(ImageData::F32(floats.iter().map(|&x| x as f32).collect())),
            ElementType::F64 => Ok(ImageData::F64(floats)),
            _ => Err(Error::InvalidValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::quantize::NULL_VALUE;
    use crate::codec::{select, Algorithm, CodecParams, QuantizeLevel, Quantization};

    fn area(n: usize) -> TileArea {
        TileArea::new(&[0], &[n])
    }

    #[test]
    fn state_machine() {
        let mut op: TileOperation<u32, u32> = TileOperation::new(0, area(1), 5);
        assert_eq!(op.state(), TileState::Created);
        op.submit();
        assert_eq!(op.state(), TileState::Submitted);
        op.run(|_, _, x| Ok(x * 2));
        assert_eq!(op.state(), TileState::Completed);
        op.run(|_, _, _| Err(Error::InvalidValue));
        assert_eq!(op.state(), TileState::Completed);
        assert_eq!(op.into_result().unwrap(), 10);
    }

    #[test]
    fn join_reports_lowest_failing_tile() {
        let pool = TilePool::new(4).unwrap();
        let mut ops: Vec<TileOperation<usize, usize>> =
            (0..20).map(|i| TileOperation::new(i, area(1), i)).collect();
        run_all(&pool, &mut ops, |_, _, &x| {
            if x == 7 || x == 13 {
                Err(Error::DecompressionError("boom"))
            } else {
                Ok(x)
            }
        });
        assert_eq!(ops[12].state(), TileState::Completed);
        assert_eq!(ops[13].state(), TileState::Failed);
        match join(ops) {
            Err(Error::TileFailed { tile, .. }) => assert_eq!(tile, 7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn random_tiles_fall_back_to_gzip() {
        let mut rng = fastrand::Rng::with_seed(99);
        let tiles = [
            ImageData::U8((0..256).map(|_| rng.u8(..)).collect()),
            ImageData::I16((0..256).map(|_| rng.i16(..)).collect()),
            ImageData::I32((0..256).map(|_| rng.i32(..)).collect()),
        ];
        let mask_codec = crate::codec::rice::RiceCodec::default();
        for noise in tiles {
            let ty = noise.element_type();
            let selection = select(ty, Algorithm::Rice1, None, &CodecParams::default()).unwrap();
            let compressor = TileCompressor {
                selection: &selection,
                quantizer: None,
                null_value: None,
                mask_codec: &mask_codec,
                no_loss: &[],
            };
            let tile = compressor.compress(0, &area(256), &noise).unwrap();
            assert_eq!(tile.encoding, TileEncoding::Gzip, "{ty:?}");
            assert_eq!(tile.scaling, None);
            let back = selection.gzip.decompress(&tile.bytes, ty, &[256]).unwrap();
            assert_eq!(back, noise);

            let smooth = ImageData::from_i64(ty, &(0..256).map(|i| i / 32).collect::<Vec<_>>()).unwrap();
            let tile = compressor.compress(1, &area(256), &smooth).unwrap();
            assert_eq!(tile.encoding, TileEncoding::Compressed, "{ty:?}");
        }
    }

    #[test]
    fn no_loss_region_is_stored_raw() {
        let selection = select(ElementType::I16, Algorithm::Rice1, None, &CodecParams::default()).unwrap();
        let mask_codec = crate::codec::rice::RiceCodec::default();
        let no_loss = [TileArea::new(&[5], &[6])];
        let compressor = TileCompressor {
            selection: &selection,
            quantizer: None,
            null_value: None,
            mask_codec: &mask_codec,
            no_loss: &no_loss,
        };
        let data = ImageData::I16(vec![3; 10]);
        let tile = compressor.compress(0, &area(10), &data).unwrap();
        assert_eq!(tile.encoding, TileEncoding::Uncompressed);
        assert_eq!(tile.bytes, data.to_be_bytes());
    }

    #[test]
    fn quantized_tile_round_trip() {
        let selection = select(
            ElementType::F32,
            Algorithm::Rice1,
            Some(Quantization::SubtractiveDither1),
            &CodecParams::default(),
        )
        .unwrap();
        let quantizer = Quantizer {
            method: Quantization::SubtractiveDither1,
            level: QuantizeLevel::Fixed { scale: 0.01, zero: 0.0 },
            dither_seed: 1,
            blank: NULL_VALUE,
        };
        let mask_codec = crate::codec::rice::RiceCodec::default();
        let data = ImageData::F32((0..400).map(|i| (i as f32 * 0.37).sin() * 10.0).collect());
        let tile = TileCompressor {
            selection: &selection,
            quantizer: Some(quantizer),
            null_value: None,
            mask_codec: &mask_codec,
            no_loss: &[],
        }
        .compress(2, &area(400), &data)
        .unwrap();
        assert_eq!(tile.encoding, TileEncoding::Compressed);

        let cells = TileCells {
            compressed: &tile.bytes,
            scaling: tile.scaling,
            ..TileCells::default()
        };
        let back = TileDecompressor {
            selection: &selection,
            element_type: ElementType::F32,
            quantizer: Some(quantizer),
            null_value: None,
            mask_codec: &mask_codec,
        }
        .decompress(2, &area(400), &cells)
        .unwrap();
        let (ImageData::F32(a), ImageData::F32(b)) = (&data, &back) else {
            panic!("type changed");
        };
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 0.01, "{x} vs {y}");
        }
    }

    #[test]
    fn empty_cells_are_an_error() {
        let selection = select(ElementType::U8, Algorithm::Gzip2, None, &CodecParams::default()).unwrap();
        let mask_codec = crate::codec::rice::RiceCodec::default();
        let decompressor = TileDecompressor {
            selection: &selection,
            element_type: ElementType::U8,
            quantizer: None,
            null_value: None,
            mask_codec: &mask_codec,
        };
        assert!(decompressor.decompress(0, &area(4), &TileCells::default()).is_err());
    }
}
