//! Compressed binary tables.
//!
//! Rows are grouped into tiles of `ZTILELEN` rows. Each compressed row holds
//! one tile: for every original column, the column's bytes over the tile's
//! rows, compressed with that column's `ZCTYPn` algorithm and stored as a
//! `1PB` cell.

use crate::array::{ElementType, ImageData};
use crate::codec::{select, Algorithm, CodecParams, CodecSelection};
use crate::error::{Error, Result};
use crate::geometry::TileArea;
use crate::hdu::CompressedHdu;
use crate::header::{Card, Header};
use crate::keywords::{backup_header, restore_header};
use crate::pool::TilePool;
use crate::table::{BinaryTable, ColumnDescriptor};
use crate::tile::{join, run_all, TileOperation};
use crate::value::Value;

/// Algorithm used for a column when the caller names none.
pub fn default_algorithm(column: &ColumnDescriptor) -> Algorithm {
    if column.col_type.element_type().size() > 1 {
        Algorithm::Gzip2
    } else {
        Algorithm::Gzip1
    }
}

fn column_selection(column: &ColumnDescriptor, algorithm: Algorithm) -> Result<CodecSelection> {
    if column.col_type.is_variable() {
        return Err(Error::UnsupportedAlgorithm(format!(
            "variable-length column '{}'",
            column.name
        )));
    }
    if !matches!(
        algorithm,
        Algorithm::Rice1 | Algorithm::Gzip1 | Algorithm::Gzip2 | Algorithm::NoCompress
    ) {
        return Err(Error::UnsupportedAlgorithm(format!("{algorithm} for table columns")));
    }
    select(column.col_type.element_type(), algorithm, None, &CodecParams::default())
}

fn tile_count(rows: usize, tile_rows: usize) -> usize {
    rows.div_ceil(tile_rows)
}

/// Compress a binary table, `tile_rows` rows per tile (0 means one tile).
///
/// `algorithms` gives the algorithm of each column in order; columns past
/// its end use [`default_algorithm`].
pub fn compress_table(
    header: &Header,
    table: &BinaryTable,
    tile_rows: usize,
    algorithms: &[Algorithm],
    pool: &TilePool,
) -> Result<CompressedHdu> {
    let rows = table.rows();
    let tile_rows = if tile_rows == 0 { rows.max(1) } else { tile_rows };
    let columns = table.columns();
    let chosen: Vec<Algorithm> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| algorithms.get(i).copied().unwrap_or_else(|| default_algorithm(col)))
        .collect();
    let selections = columns
        .iter()
        .zip(&chosen)
        .map(|(col, &algorithm)| column_selection(col, algorithm))
        .collect::<Result<Vec<_>>>()?;

    let tiles = tile_count(rows, tile_rows);
    log::debug!("compressing {rows} rows of {} columns in {tiles} tiles", columns.len());
    let mut ops: Vec<TileOperation<(), Vec<Vec<u8>>>> = (0..tiles)
        .map(|t| {
            let end = ((t + 1) * tile_rows).min(rows);
            TileOperation::new(t, TileArea::new(&[t * tile_rows], &[end]), ())
        })
        .collect();
    run_all(pool, &mut ops, |_, area, _| {
        let range = area.start[0]..area.end[0];
        columns
            .iter()
            .enumerate()
            .map(|(col, descriptor)| {
                let bytes = table.column_bytes(col, range.clone())?;
                let element_type = descriptor.col_type.element_type();
                let len = bytes.len() / element_type.size();
                let samples = ImageData::from_be_bytes(element_type, &bytes, len)?;
                selections[col].codec.compress(&samples, &[len])
            })
            .collect()
    });
    let cells = join(ops)?;

    let mut compressed_table = BinaryTable::new(
        columns.iter().map(|c| ColumnDescriptor::var_bytes(&c.name)).collect(),
    );
    for tile in &cells {
        let row = compressed_table.add_row();
        for (col, bytes) in tile.iter().enumerate() {
            compressed_table.put_var(row, col, bytes)?;
        }
    }

    let mut compressed = Header::from_cards(compressed_table.header_cards());
    for card in header {
        let name = card.keyword_str();
        if name == "TFIELDS" || name.starts_with("TTYPE") {
            compressed.set(card.clone());
        }
    }
    compressed.push(Card::new("ZTABLE", Value::Logical(true)).with_comment("this is a compressed table"));
    compressed.push(Card::new("ZTILELEN", Value::Integer(tile_rows as i64)).with_comment("number of rows in each tile"));
    for (i, algorithm) in chosen.iter().enumerate() {
        compressed.push(Card::new(
            &format!("ZCTYP{}", i + 1),
            Value::String(String::from(algorithm.name())),
        ));
    }
    backup_header(header, &mut compressed);

    log::info!(
        "compressed {} table bytes into {} heap bytes",
        table.row_bytes().len(),
        compressed_table.heap().size()
    );
    Ok(CompressedHdu::new(compressed, compressed_table))
}

/// The original table's shape and codecs, read from a compressed header.
struct TableLayout {
    columns: Vec<ColumnDescriptor>,
    rows: usize,
    tile_rows: usize,
    selections: Vec<CodecSelection>,
}

impl TableLayout {
    fn from_header(header: &Header) -> Result<TableLayout> {
        if header.logical("ZTABLE") != Some(true) {
            return Err(Error::MissingKeyword(String::from("ZTABLE")));
        }
        header.require_int("ZBITPIX")?;
        header.require_int("ZNAXIS")?;
        let width = usize::try_from(header.require_int("ZNAXIS1")?).map_err(|_| Error::InvalidValue)?;
        let rows = usize::try_from(header.require_int("ZNAXIS2")?).map_err(|_| Error::InvalidValue)?;
        let tfields = usize::try_from(header.require_int("TFIELDS")?).map_err(|_| Error::InvalidValue)?;

        let mut columns = Vec::with_capacity(tfields);
        let mut selections = Vec::with_capacity(tfields);
        for n in 1..=tfields {
            let name = header.string(&format!("TTYPE{n}")).unwrap_or("");
            let column = ColumnDescriptor::from_tform(name, header.require_string(&format!("ZFORM{n}"))?)?;
            let algorithm = Algorithm::from_name(header.require_string(&format!("ZCTYP{n}"))?)?;
            selections.push(column_selection(&column, algorithm)?);
            columns.push(column);
        }
        if columns.iter().map(|c| c.byte_width).sum::<usize>() != width {
            return Err(Error::InvalidHeader);
        }

        let tile_rows = match header.int("ZTILELEN") {
            Some(n) => usize::try_from(n).ok().filter(|&n| n > 0).ok_or(Error::InvalidValue)?,
            None => rows.max(1),
        };
        Ok(TableLayout {
            columns,
            rows,
            tile_rows,
            selections,
        })
    }

    fn tiles(&self) -> usize {
        tile_count(self.rows, self.tile_rows)
    }
}

/// Decompress the cells of `columns` in tiles `from..to`: one byte vector
/// per tile and listed column, in tile order.
fn decode_cells(
    hdu: &CompressedHdu,
    layout: &TableLayout,
    columns: &[usize],
    from: usize,
    to: usize,
    pool: &TilePool,
) -> Result<Vec<Vec<Vec<u8>>>> {
    let compressed = &hdu.table;
    if compressed.rows() != layout.tiles() || compressed.columns().len() != layout.columns.len() {
        return Err(Error::InvalidHeader);
    }
    let mut ops: Vec<TileOperation<(), Vec<Vec<u8>>>> = (from..to)
        .map(|t| {
            let end = ((t + 1) * layout.tile_rows).min(layout.rows);
            TileOperation::new(t, TileArea::new(&[t * layout.tile_rows], &[end]), ())
        })
        .collect();
    run_all(pool, &mut ops, |tile, area, _| {
        let rows = area.end[0] - area.start[0];
        columns
            .iter()
            .map(|&col| {
                let descriptor = layout.columns.get(col).ok_or(Error::InvalidValue)?;
                let selection = layout.selections.get(col).ok_or(Error::InvalidValue)?;
                let element_type: ElementType = descriptor.col_type.element_type();
                let len = rows * descriptor.byte_width / element_type.size();
                let bytes = compressed.var_cell(tile, col)?;
                let samples = selection.codec.decompress(bytes, element_type, &[len])?;
                Ok(samples.to_be_bytes())
            })
            .collect()
    });
    join(ops)
}

/// Decompress tiles `from..to` into a table holding just their rows.
fn run_tiles(hdu: &CompressedHdu, layout: &TableLayout, from: usize, to: usize, pool: &TilePool) -> Result<BinaryTable> {
    let every_column: Vec<usize> = (0..layout.columns.len()).collect();
    let cells = decode_cells(hdu, layout, &every_column, from, to, pool)?;

    let mut table = BinaryTable::new(layout.columns.clone());
    let first_row = from * layout.tile_rows;
    let end_row = (to * layout.tile_rows).min(layout.rows);
    for _ in first_row..end_row {
        table.add_row();
    }
    for (i, tile) in cells.iter().enumerate() {
        let row = i * layout.tile_rows;
        for (col, bytes) in tile.iter().enumerate() {
            table.set_column_bytes(col, row, bytes)?;
        }
    }
    Ok(table)
}

fn check_range(layout: &TableLayout, from: usize, to: usize) -> Result<()> {
    let tiles = layout.tiles();
    if from > to || to > tiles {
        return Err(Error::InvalidTileRange { from, to, tiles });
    }
    Ok(())
}

/// Restore the original header and table.
pub fn decompress_table(hdu: &CompressedHdu, pool: &TilePool) -> Result<(Header, BinaryTable)> {
    let layout = TableLayout::from_header(&hdu.header)?;
    let table = run_tiles(hdu, &layout, 0, layout.tiles(), pool)?;

    let mut plain = restore_header(&hdu.header);
    let at = plain.position("GCOUNT").map_or(plain.len(), |i| i + 1);
    if let Some(card) = hdu.header.get("TFIELDS") {
        plain.insert(at, card.clone());
    }
    for (n, card) in hdu.header.indexed("TTYPE") {
        if card.value.as_ref().and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty()) {
            let at = plain.position(&format!("TFORM{n}")).unwrap_or(plain.len());
            plain.insert(at, card.clone());
        }
    }
    Ok((plain, table))
}

/// Rows of tiles `from..to`: original rows
/// `from * ZTILELEN .. min(rows, to * ZTILELEN)`.
pub fn decompress_table_tiles(hdu: &CompressedHdu, from: usize, to: usize, pool: &TilePool) -> Result<BinaryTable> {
    let layout = TableLayout::from_header(&hdu.header)?;
    check_range(&layout, from, to)?;
    run_tiles(hdu, &layout, from, to, pool)
}

/// Bytes of column `col` (0-based) over the rows of tiles `from..to`,
/// decompressing only that column's cells.
///
/// The bytes are laid out as [`BinaryTable::column_bytes`] returns them.
pub fn decompress_table_column(
    hdu: &CompressedHdu,
    col: usize,
    from: usize,
    to: usize,
    pool: &TilePool,
) -> Result<Vec<u8>> {
    let layout = TableLayout::from_header(&hdu.header)?;
    check_range(&layout, from, to)?;
    if col >= layout.columns.len() {
        return Err(Error::InvalidValue);
    }
    let cells = decode_cells(hdu, &layout, &[col], from, to, pool)?;
    log::debug!("column {col} of tiles {from}..{to}: {} cells", cells.len());
    Ok(cells.into_iter().flatten().flatten().collect())
}
