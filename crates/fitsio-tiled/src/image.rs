//! Compressed image HDUs.
//!
//! [`compress_image`] cuts an image into tiles, compresses every tile on the
//! caller's pool and stores the results as variable-length cells of a
//! binary table. [`decompress_image`] reverses it; [`decompress_tiles`] and
//! [`decompress_rows`] restore only part of the image.

use std::ops::Range;

use crate::array::{map_samples, ElementType, ImageData};
use crate::codec::{self, select, Algorithm, CodecParams, CodecSelection, QuantizeLevel, Quantization, Quantizer};
use crate::codec::quantize::NULL_VALUE;
use crate::error::{Error, Result};
use crate::geometry::{default_tile_shape, gather, plan_tiles, scatter, tile_grid, tile_shape_from_header, TileArea};
use crate::hdu::CompressedHdu;
use crate::header::{Card, Header};
use crate::heap::{Heap, MAX_HEAP_SIZE};
use crate::keywords::{backup_header, restore_header};
use crate::pool::TilePool;
use crate::table::{BinaryTable, ColumnDescriptor, ColumnType};
use crate::tile::{join, run_all, CompressedTile, TileCells, TileCompressor, TileDecompressor, TileEncoding, TileOperation};
use crate::value::Value;

pub const COMPRESSED_DATA: &str = "COMPRESSED_DATA";
pub const GZIP_COMPRESSED_DATA: &str = "GZIP_COMPRESSED_DATA";
pub const UNCOMPRESSED_DATA: &str = "UNCOMPRESSED_DATA";
pub const NULL_PIXEL_MASK: &str = "NULL_PIXEL_MASK";
pub const ZSCALE: &str = "ZSCALE";
pub const ZZERO: &str = "ZZERO";
pub const ZBLANK: &str = "ZBLANK";

/// `EXTNAME` given to compressed images that had none.
pub const DEFAULT_EXTNAME: &str = "COMPRESSED_IMAGE";

/// Parameters of one [`compress_image`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub algorithm: Algorithm,
    /// Tile lengths in FITS order; `None` tiles by rows.
    pub tile_shape: Option<Vec<usize>>,
    pub quantize: Option<(Quantization, QuantizeLevel)>,
    /// `ZDITHER0`.
    pub dither_seed: i64,
    pub params: CodecParams,
    /// `ZMASKCMP`.
    pub mask_algorithm: Algorithm,
    /// `ZBLANK`: the quantized value standing for NaN.
    pub quantized_blank: i32,
    /// Regions whose tiles are stored uncompressed.
    pub no_loss: Vec<TileArea>,
    pub heap_limit: u64,
}

impl CompressionConfig {
    pub fn new(algorithm: Algorithm) -> Self {
        CompressionConfig {
            algorithm,
            tile_shape: None,
            quantize: None,
            dither_seed: 1,
            params: CodecParams::default(),
            mask_algorithm: Algorithm::Rice1,
            quantized_blank: NULL_VALUE,
            no_loss: Vec::new(),
            heap_limit: MAX_HEAP_SIZE,
        }
    }

    pub fn tile_shape(mut self, shape: &[usize]) -> Self {
        self.tile_shape = Some(shape.to_vec());
        self
    }

    /// Quantize float images before compressing them.
    pub fn quantize(mut self, method: Quantization, level: QuantizeLevel) -> Self {
        self.quantize = Some((method, level));
        self
    }

    pub fn dither_seed(mut self, seed: i64) -> Self {
        self.dither_seed = seed;
        self
    }

    pub fn rice_blocksize(mut self, blocksize: usize) -> Self {
        self.params.rice_blocksize = blocksize;
        self
    }

    pub fn hcompress_scale(mut self, scale: i32) -> Self {
        self.params.hcompress_scale = scale;
        self
    }

    pub fn mask_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.mask_algorithm = algorithm;
        self
    }

    /// Quantized value written for NaN samples. It must lie outside the
    /// quantized range; tiles that would reach it are stored losslessly.
    pub fn quantized_blank(mut self, blank: i32) -> Self {
        self.quantized_blank = blank;
        self
    }

    /// Store every tile touching `region` without loss.
    pub fn force_no_loss(mut self, region: TileArea) -> Self {
        self.no_loss.push(region);
        self
    }

    pub fn heap_limit(mut self, limit: u64) -> Self {
        self.heap_limit = limit;
        self
    }
}

fn gather_image(area: &TileArea, axes: &[usize], data: &ImageData) -> ImageData {
    map_samples!(data, v => gather(area, axes, v))
}

fn scatter_image(area: &TileArea, axes: &[usize], tile: &ImageData, dst: &mut ImageData) -> Result<()> {
    match (tile, dst) {
        (ImageData::U8(t), ImageData::U8(d)) => scatter(area, axes, t, d),
        (ImageData::I16(t), ImageData::I16(d)) => scatter(area, axes, t, d),
        (ImageData::I32(t), ImageData::I32(d)) => scatter(area, axes, t, d),
        (ImageData::I64(t), ImageData::I64(d)) => scatter(area, axes, t, d),
        (ImageData::F32(t), ImageData::F32(d)) => scatter(area, axes, t, d),
        (ImageData::F64(t), ImageData::F64(d)) => scatter(area, axes, t, d),
        _ => return Err(Error::DecompressionError("tile element type differs from the image")),
    }
    Ok(())
}

fn axis_len(header: &Header, name: &str) -> Result<usize> {
    usize::try_from(header.require_int(name)?).map_err(|_| Error::InvalidValue)
}

/// Samples in an array of `axes`; none without axes.
fn sample_count(axes: &[usize]) -> usize {
    if axes.is_empty() {
        0
    } else {
        axes.iter().product()
    }
}

/// Element type (`BITPIX` with any `BZERO` offset) and axis lengths of a
/// plain image header.
fn image_shape(header: &Header) -> Result<(ElementType, Vec<usize>)> {
    let element_type = ElementType::from_scaling(
        header.require_int("BITPIX")?,
        header.float("BZERO"),
        header.float("BSCALE"),
    )?;
    let naxis = axis_len(header, "NAXIS")?;
    let axes = (1..=naxis)
        .map(|n| axis_len(header, &format!("NAXIS{n}")))
        .collect::<Result<Vec<_>>>()?;
    Ok((element_type, axes))
}

/// `BZERO` card of an offset element type.
fn bzero_card(element_type: ElementType) -> Option<Card> {
    let bzero = element_type.bzero()?;
    let value = match element_type {
        ElementType::U64 => Value::Float(bzero),
        _ => Value::Integer(bzero as i64),
    };
    Some(Card::new("BZERO", value).with_comment("offset of the stored values"))
}

/// Compress an image HDU.
///
/// `header` describes `data` (`BITPIX`, `NAXIS`, `NAXISn`). Its cards are
/// kept in the compressed header under their compressed names. Signed
/// 8-bit and unsigned 16, 32 and 64-bit samples are stored with the
/// `BZERO` offset; a header without `BZERO` gets one.
pub fn compress_image(
    header: &Header,
    data: &ImageData,
    config: &CompressionConfig,
    pool: &TilePool,
) -> Result<CompressedHdu> {
    let (declared, axes) = image_shape(header)?;
    let image_type = data.element_type();
    let add_bzero = declared != image_type && declared == image_type.storage() && header.get("BZERO").is_none();
    if (declared != image_type && !add_bzero) || sample_count(&axes) != data.len() {
        return Err(Error::InvalidValue);
    }
    let stored = data.to_storage();
    let data = stored.as_ref();
    let element_type = data.element_type();

    let tile_shape: Vec<usize> = match &config.tile_shape {
        Some(shape) if shape.len() != axes.len() => return Err(Error::InvalidValue),
        Some(shape) => shape.iter().zip(&axes).map(|(&t, &a)| t.min(a).max(1)).collect(),
        None => default_tile_shape(&axes).into_iter().map(|t| t.max(1)).collect(),
    };
    let areas = plan_tiles(&axes, &tile_shape)?;

    let selection = select(
        element_type,
        config.algorithm,
        config.quantize.map(|(method, _)| method),
        &config.params,
    )?;
    let quantizer = match (selection.quantize, config.quantize) {
        (Some(method), Some((_, level))) => Some(Quantizer {
            method,
            level,
            dither_seed: config.dither_seed,
            blank: config.quantized_blank,
        }),
        _ => None,
    };
    let null_value = if element_type.is_float() { None } else { header.int("BLANK") };
    let mask_codec = codec::codec(config.mask_algorithm, &CodecParams::default());
    log::debug!(
        "compressing {} tiles of {:?} (tile {:?}) with {}",
        areas.len(),
        axes,
        tile_shape,
        config.algorithm
    );

    let compressor = TileCompressor {
        selection: &selection,
        quantizer,
        null_value,
        mask_codec: mask_codec.as_ref(),
        no_loss: &config.no_loss,
    };
    let mut ops: Vec<TileOperation<&ImageData, CompressedTile>> = areas
        .into_iter()
        .enumerate()
        .map(|(i, area)| TileOperation::new(i, area, data))
        .collect();
    run_all(pool, &mut ops, |index, area, data| {
        compressor.compress(index, area, &gather_image(area, &axes, data))
    });
    let tiles = join(ops)?;

    let per_tile_scaling = matches!(quantizer, Some(Quantizer { level: QuantizeLevel::Noise(_), .. }));
    let table = build_table(&tiles, per_tile_scaling, config.heap_limit)?;

    let mut compressed = Header::from_cards(table.header_cards());
    compressed.push(Card::new("ZIMAGE", Value::Logical(true)).with_comment("extension contains compressed image"));
    for (i, t) in tile_shape.iter().enumerate() {
        compressed.push(
            Card::new(&format!("ZTILE{}", i + 1), Value::Integer(*t as i64))
                .with_comment("size of tiles to be compressed"),
        );
    }
    compressed.push(Card::new("ZCMPTYPE", Value::String(String::from(config.algorithm.name()))).with_comment("compression algorithm"));
    for (i, (name, value)) in config.params.to_pairs(config.algorithm, selection.codec_type).into_iter().enumerate() {
        let n = i + 1;
        compressed.push(Card::new(&format!("ZNAME{n}"), Value::String(String::from(name))).with_comment("compression parameter"));
        compressed.push(Card::new(&format!("ZVAL{n}"), value));
    }
    if let Some(quantizer) = quantizer {
        compressed.push(Card::new("ZQUANTIZ", Value::String(String::from(quantizer.method.name()))).with_comment("quantization method"));
        if quantizer.method != Quantization::NoDither {
            compressed.push(Card::new("ZDITHER0", Value::Integer(quantizer.dither_seed)).with_comment("dithering offset"));
        }
        if let QuantizeLevel::Fixed { scale, zero } = quantizer.level {
            compressed.push(Card::new("ZSCALE", Value::Float(scale)));
            compressed.push(Card::new("ZZERO", Value::Float(zero)));
        }
        compressed.push(Card::new(ZBLANK, Value::Integer(i64::from(quantizer.blank))).with_comment("null value in quantized data"));
    }
    if table.column_index(NULL_PIXEL_MASK).is_some() {
        compressed.push(Card::new("ZMASKCMP", Value::String(String::from(config.mask_algorithm.name()))));
    }
    if header.get("EXTNAME").is_none() {
        compressed.push(Card::new("EXTNAME", Value::String(String::from(DEFAULT_EXTNAME))));
    }
    backup_header(header, &mut compressed);
    if let (true, Some(card)) = (add_bzero, bzero_card(image_type)) {
        compressed.push(card);
    }

    log::info!(
        "compressed {} tiles with {}: heap {} bytes for {} bytes of samples",
        tiles.len(),
        config.algorithm,
        table.heap().size(),
        data.len() * element_type.size()
    );
    Ok(CompressedHdu::new(compressed, table))
}

/// Lay the compressed tiles out as table rows, in tile order.
fn build_table(tiles: &[CompressedTile], per_tile_scaling: bool, heap_limit: u64) -> Result<BinaryTable> {
    let uses = |encoding| tiles.iter().any(|t| t.encoding == encoding);
    let mut columns = vec![ColumnDescriptor::var_bytes(COMPRESSED_DATA)];
    if uses(TileEncoding::Gzip) {
        columns.push(ColumnDescriptor::var_bytes(GZIP_COMPRESSED_DATA));
    }
    if uses(TileEncoding::Uncompressed) {
        columns.push(ColumnDescriptor::var_bytes(UNCOMPRESSED_DATA));
    }
    if tiles.iter().any(|t| t.mask.is_some()) {
        columns.push(ColumnDescriptor::var_bytes(NULL_PIXEL_MASK));
    }
    if per_tile_scaling {
        columns.push(ColumnDescriptor::new(ZSCALE, 1, ColumnType::Double));
        columns.push(ColumnDescriptor::new(ZZERO, 1, ColumnType::Double));
    }

    let mut table = BinaryTable::with_heap(columns, Heap::with_limit(heap_limit));
    let column = |table: &BinaryTable, name| table.column_index(name).ok_or(Error::InvalidValue);
    for tile in tiles {
        let row = table.add_row();
        let name = match tile.encoding {
            TileEncoding::Compressed => COMPRESSED_DATA,
            TileEncoding::Gzip => GZIP_COMPRESSED_DATA,
            TileEncoding::Uncompressed => UNCOMPRESSED_DATA,
        };
        let col = column(&table, name)?;
        table.put_var(row, col, &tile.bytes)?;
        if let Some(mask) = &tile.mask {
            let col = column(&table, NULL_PIXEL_MASK)?;
            table.put_var(row, col, mask)?;
        }
        if let (true, Some((scale, zero))) = (per_tile_scaling, tile.scaling) {
            let col = column(&table, ZSCALE)?;
            table.set_f64_cell(row, col, scale)?;
            let col = column(&table, ZZERO)?;
            table.set_f64_cell(row, col, zero)?;
        }
    }
    Ok(table)
}

/// Everything the compression keywords say about a compressed image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLayout {
    pub algorithm: Algorithm,
    /// Type the tiles are stored as (`ZBITPIX`).
    pub element_type: ElementType,
    /// Type of the restored image: `element_type` shifted by any `BZERO`
    /// offset.
    pub image_type: ElementType,
    pub axes: Vec<usize>,
    pub tile_shape: Vec<usize>,
    pub params: CodecParams,
    pub quantizer: Option<Quantizer>,
    pub mask_algorithm: Algorithm,
    /// `BLANK` of integer images.
    pub null_value: Option<i64>,
}

impl ImageLayout {
    /// Read the layout from a compressed image header.
    ///
    /// Fails with [`Error::MissingKeyword`] when `ZCMPTYPE`, `ZBITPIX`,
    /// `ZNAXIS` or any `ZNAXISn` is absent.
    pub fn from_header(header: &Header) -> Result<ImageLayout> {
        let algorithm = Algorithm::from_name(header.require_string("ZCMPTYPE")?)?;
        let zbitpix = header.require_int("ZBITPIX")?;
        let element_type = ElementType::from_bitpix(zbitpix)?;
        let image_type = ElementType::from_scaling(zbitpix, header.float("BZERO"), header.float("BSCALE"))?;
        let naxis = axis_len(header, "ZNAXIS")?;
        let axes = (1..=naxis)
            .map(|n| axis_len(header, &format!("ZNAXIS{n}")))
            .collect::<Result<Vec<_>>>()?;
        let tile_shape = tile_shape_from_header(header, &axes)?;

        let names = header.indexed("ZNAME");
        let params = CodecParams::from_pairs(names.iter().filter_map(|(n, card)| {
            let name = card.value.as_ref()?.as_str()?;
            let value = header.value(&format!("ZVAL{n}"))?;
            Some((name, value))
        }))?;

        let blank = match header.int(ZBLANK) {
            Some(blank) => i32::try_from(blank).map_err(|_| Error::InvalidValue)?,
            None => NULL_VALUE,
        };
        let quantizer = if element_type.is_float() {
            let method = match header.string("ZQUANTIZ") {
                Some(name) => Quantization::parse(name)?,
                None if header.get(ZSCALE).is_some() => Some(Quantization::NoDither),
                None => None,
            };
            method.map(|method| {
                let level = match (header.float(ZSCALE), header.float(ZZERO)) {
                    (Some(scale), Some(zero)) => QuantizeLevel::Fixed { scale, zero },
                    _ => QuantizeLevel::default(),
                };
                Quantizer {
                    method,
                    level,
                    dither_seed: header.int("ZDITHER0").unwrap_or(1),
                    blank,
                }
            })
        } else {
            None
        };

        let mask_algorithm = match header.string("ZMASKCMP") {
            Some(name) => Algorithm::from_name(name)?,
            None => Algorithm::Rice1,
        };
        let null_value = if element_type.is_float() { None } else { header.int("BLANK") };

        Ok(ImageLayout {
            algorithm,
            element_type,
            image_type,
            axes,
            tile_shape,
            params,
            quantizer,
            mask_algorithm,
            null_value,
        })
    }

    pub fn tiles(&self) -> Result<Vec<TileArea>> {
        plan_tiles(&self.axes, &self.tile_shape)
    }

    pub fn selection(&self) -> Result<CodecSelection> {
        select(
            self.element_type,
            self.algorithm,
            self.quantizer.map(|q| q.method),
            &self.params,
        )
    }
}

/// Column positions of a compressed image table.
struct ImageColumns {
    compressed: Option<usize>,
    gzip: Option<usize>,
    uncompressed: Option<usize>,
    mask: Option<usize>,
    scaling: Option<(usize, usize)>,
    blank: Option<usize>,
}

impl ImageColumns {
    fn find(table: &BinaryTable) -> ImageColumns {
        ImageColumns {
            compressed: table.column_index(COMPRESSED_DATA),
            gzip: table.column_index(GZIP_COMPRESSED_DATA),
            uncompressed: table.column_index(UNCOMPRESSED_DATA),
            mask: table.column_index(NULL_PIXEL_MASK),
            scaling: table.column_index(ZSCALE).zip(table.column_index(ZZERO)),
            blank: table.column_index(ZBLANK),
        }
    }

    fn cells<'t>(&self, table: &'t BinaryTable, row: usize) -> Result<TileCells<'t>> {
        let var = |col: Option<usize>| match col {
            Some(col) => table.var_cell(row, col),
            None => Ok(&[][..]),
        };
        let scaling = match self.scaling {
            Some((s, z)) => Some((table.f64_cell(row, s)?, table.f64_cell(row, z)?)),
            None => None,
        };
        let blank = match self.blank {
            Some(col) => Some(i32::try_from(table.i64_cell(row, col)?).map_err(|_| Error::InvalidValue)?),
            None => None,
        };
        Ok(TileCells {
            compressed: var(self.compressed)?,
            gzip: var(self.gzip)?,
            uncompressed: var(self.uncompressed)?,
            mask: var(self.mask)?,
            scaling,
            blank,
        })
    }
}

/// Decompress tiles `range` of a compressed image, in tile order.
fn run_tiles(
    hdu: &CompressedHdu,
    layout: &ImageLayout,
    areas: Vec<TileArea>,
    range: Range<usize>,
    pool: &TilePool,
) -> Result<Vec<(TileArea, ImageData)>> {
    let table = &hdu.table;
    if table.rows() != areas.len() {
        return Err(Error::InvalidHeader);
    }
    let selection = layout.selection()?;
    let mask_codec = codec::codec(layout.mask_algorithm, &CodecParams::default());
    let decompressor = TileDecompressor {
        selection: &selection,
        element_type: layout.element_type,
        quantizer: layout.quantizer,
        null_value: layout.null_value,
        mask_codec: mask_codec.as_ref(),
    };
    let columns = ImageColumns::find(table);
    log::debug!("decompressing tiles {}..{} of {}", range.start, range.end, areas.len());

    let mut ops: Vec<TileOperation<(), ImageData>> = areas
        .into_iter()
        .enumerate()
        .skip(range.start)
        .take(range.len())
        .map(|(i, area)| TileOperation::new(i, area, ()))
        .collect();
    run_all(pool, &mut ops, |index, area, _| {
        decompressor.decompress(index, area, &columns.cells(table, index)?)
    });
    let areas: Vec<TileArea> = ops.iter().map(|op| op.area().clone()).collect();
    Ok(areas.into_iter().zip(join(ops)?).collect())
}

/// Restore the original header and samples of a compressed image.
pub fn decompress_image(hdu: &CompressedHdu, pool: &TilePool) -> Result<(Header, ImageData)> {
    let layout = ImageLayout::from_header(&hdu.header)?;
    let areas = layout.tiles()?;
    let count = areas.len();
    let tiles = run_tiles(hdu, &layout, areas, 0..count, pool)?;

    let mut image = ImageData::zeros(layout.element_type, sample_count(&layout.axes));
    for (area, samples) in &tiles {
        scatter_image(area, &layout.axes, samples, &mut image)?;
    }
    Ok((restore_header(&hdu.header), image.into_type(layout.image_type)?))
}

/// Samples of tiles `range`, concatenated in tile order.
///
/// Each tile contributes its samples in tile order, exactly as they sit in
/// the region the tile covers.
pub fn decompress_tiles(hdu: &CompressedHdu, range: Range<usize>, pool: &TilePool) -> Result<ImageData> {
    let layout = ImageLayout::from_header(&hdu.header)?;
    let areas = layout.tiles()?;
    if range.start > range.end || range.end > areas.len() {
        return Err(Error::InvalidTileRange {
            from: range.start,
            to: range.end,
            tiles: areas.len(),
        });
    }
    let tiles = run_tiles(hdu, &layout, areas, range, pool)?;
    concat(layout.element_type, tiles.into_iter().map(|(_, samples)| samples)).into_type(layout.image_type)
}

fn concat(element_type: ElementType, parts: impl Iterator<Item = ImageData>) -> ImageData {
    let mut out = ImageData::zeros(element_type, 0);
    for part in parts {
        match (&mut out, part) {
            (ImageData::U8(o), ImageData::U8(p)) => o.extend(p),
            (ImageData::I16(o), ImageData::I16(p)) => o.extend(p),
            (ImageData::I32(o), ImageData::I32(p)) => o.extend(p),
            (ImageData::I64(o), ImageData::I64(p)) => o.extend(p),
            (ImageData::F32(o), ImageData::F32(p)) => o.extend(p),
            (ImageData::F64(o), ImageData::F64(p)) => o.extend(p),
            _ => {}
        }
    }
    out
}

/// Restore image rows `rows` (runs of `NAXIS1` samples over the flattened
/// higher axes) without decompressing the tiles that hold no part of them.
///
/// Tiles must span the full first axis and be one sample deep on every
/// axis beyond the second.
pub fn decompress_rows(hdu: &CompressedHdu, rows: Range<usize>, pool: &TilePool) -> Result<ImageData> {
    let layout = ImageLayout::from_header(&hdu.header)?;
    let axes = &layout.axes;
    let shape = &layout.tile_shape;
    let Some(&width) = axes.first() else {
        return Ok(ImageData::zeros(layout.image_type, 0));
    };
    if shape[0] < width || shape.iter().skip(2).any(|&t| t != 1) {
        return Err(Error::InvalidValue);
    }
    let total_rows: usize = axes.iter().skip(1).product();
    if rows.start > rows.end || rows.end > total_rows {
        return Err(Error::InvalidValue);
    }
    if rows.is_empty() {
        return Ok(ImageData::zeros(layout.image_type, 0));
    }

    let naxis2 = axes.get(1).copied().unwrap_or(1);
    let band = shape.get(1).copied().unwrap_or(1);
    let bands = tile_grid(axes, shape)?.get(1).copied().unwrap_or(1);
    let tile_of = |row: usize| (row % naxis2) / band + bands * (row / naxis2);
    let first_row_of = |tile: usize| (tile / bands) * naxis2 + (tile % bands) * band;

    let first = tile_of(rows.start);
    let last = tile_of(rows.end - 1);
    let areas = layout.tiles()?;
    let tiles = run_tiles(hdu, &layout, areas, first..last + 1, pool)?;
    let samples = concat(layout.element_type, tiles.into_iter().map(|(_, s)| s));
    let skip = (rows.start - first_row_of(first)) * width;
    samples.slice(skip..skip + rows.len() * width).into_type(layout.image_type)
}

/// Storage column used by every tile.
pub fn tile_encodings(hdu: &CompressedHdu) -> Result<Vec<TileEncoding>> {
    let table = &hdu.table;
    let columns = ImageColumns::find(table);
    (0..table.rows())
        .map(|row| {
            let cells = columns.cells(table, row)?;
            Ok(if !cells.compressed.is_empty() {
                TileEncoding::Compressed
            } else if !cells.gzip.is_empty() {
                TileEncoding::Gzip
            } else if !cells.uncompressed.is_empty() {
                TileEncoding::Uncompressed
            } else {
                TileEncoding::Compressed
            })
        })
        .collect()
}
