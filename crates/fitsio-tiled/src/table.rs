//! Binary table model: fixed-width rows plus a heap for variable-length
//! cells.

use crate::array::ElementType;
use crate::endian::{
    read_f64_be, read_i16_be, read_i32_be, read_i64_be, read_u32_be, read_u64_be, write_f64_be, write_u32_be,
    write_u64_be,
};
use crate::error::{Error, Result};
use crate::header::{Card, Header};
use crate::heap::{Heap, HeapDescriptor};
use crate::value::Value;

/// The data type of a binary table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// L -- logical, one byte.
    Logical,
    /// X -- bit array.
    Bit,
    /// B -- unsigned byte.
    Byte,
    /// I -- 16-bit signed integer.
    Short,
    /// J -- 32-bit signed integer.
    Int,
    /// K -- 64-bit signed integer.
    Long,
    /// E -- 32-bit IEEE float.
    Float,
    /// D -- 64-bit IEEE float.
    Double,
    /// C -- pair of 32-bit floats.
    ComplexFloat,
    /// M -- pair of 64-bit floats.
    ComplexDouble,
    /// A -- ASCII character.
    Ascii,
    /// P -- 32-bit descriptor of a heap array of the given element code.
    VarArrayP(u8),
    /// Q -- 64-bit descriptor of a heap array of the given element code.
    VarArrayQ(u8),
}

impl ColumnType {
    fn from_code(code: u8) -> Result<ColumnType> {
        Ok(match code {
            b'L' => ColumnType::Logical,
            b'X' => ColumnType::Bit,
            b'B' => ColumnType::Byte,
            b'I' => ColumnType::Short,
            b'J' => ColumnType::Int,
            b'K' => ColumnType::Long,
            b'E' => ColumnType::Float,
            b'D' => ColumnType::Double,
            b'C' => ColumnType::ComplexFloat,
            b'M' => ColumnType::ComplexDouble,
            b'A' => ColumnType::Ascii,
            _ => return Err(Error::InvalidValue),
        })
    }

    fn code(self) -> u8 {
        match self {
            ColumnType::Logical => b'L',
            ColumnType::Bit => b'X',
            ColumnType::Byte => b'B',
            ColumnType::Short => b'I',
            ColumnType::Int => b'J',
            ColumnType::Long => b'K',
            ColumnType::Float => b'E',
            ColumnType::Double => b'D',
            ColumnType::ComplexFloat => b'C',
            ColumnType::ComplexDouble => b'M',
            ColumnType::Ascii => b'A',
            ColumnType::VarArrayP(_) => b'P',
            ColumnType::VarArrayQ(_) => b'Q',
        }
    }

    pub fn is_variable(self) -> bool {
        matches!(self, ColumnType::VarArrayP(_) | ColumnType::VarArrayQ(_))
    }

    /// Element type used when the column's bytes are compressed as an
    /// array. Complex columns compress as their float components and
    /// character/bit/logical columns as bytes.
    pub fn element_type(self) -> ElementType {
        match self {
            ColumnType::Short => ElementType::I16,
            ColumnType::Int => ElementType::I32,
            ColumnType::Long => ElementType::I64,
            ColumnType::Float | ColumnType::ComplexFloat => ElementType::F32,
            ColumnType::Double | ColumnType::ComplexDouble => ElementType::F64,
            _ => ElementType::U8,
        }
    }
}

/// Bytes per row for `repeat` elements of `col_type`.
fn byte_width(repeat: usize, col_type: ColumnType) -> usize {
    match col_type {
        ColumnType::Bit => repeat.div_ceil(8),
        ColumnType::Logical | ColumnType::Byte | ColumnType::Ascii => repeat,
        ColumnType::Short => 2 * repeat,
        ColumnType::Int | ColumnType::Float => 4 * repeat,
        ColumnType::Long | ColumnType::Double | ColumnType::ComplexFloat => 8 * repeat,
        ColumnType::ComplexDouble => 16 * repeat,
        ColumnType::VarArrayP(_) => 8 * repeat,
        ColumnType::VarArrayQ(_) => 16 * repeat,
    }
}

/// Parse a TFORMn value like `1J`, `10E`, `20A`, `1PB(200)` or `1QB`.
pub fn parse_tform(s: &str) -> Result<(usize, ColumnType)> {
    let s = s.trim();
    // Strip the optional (maxlen) suffix of variable-length arrays.
    let s = s.find('(').map_or(s, |paren| &s[..paren]);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    let repeat = if digits == 0 {
        1
    } else {
        s[..digits].parse::<usize>().map_err(|_| Error::InvalidValue)?
    };
    let codes = &s.as_bytes()[digits..];
    let col_type = match codes {
        [b'P', element] => {
            ColumnType::from_code(*element)?;
            ColumnType::VarArrayP(*element)
        }
        [b'Q', element] => {
            ColumnType::from_code(*element)?;
            ColumnType::VarArrayQ(*element)
        }
        [code] => ColumnType::from_code(*code)?,
        _ => return Err(Error::InvalidValue),
    };
    Ok((repeat, col_type))
}

/// The TFORMn string for a column.
pub fn tform_string(repeat: usize, col_type: ColumnType) -> String {
    match col_type {
        ColumnType::VarArrayP(e) | ColumnType::VarArrayQ(e) => {
            format!("{}{}{}", repeat, col_type.code() as char, e as char)
        }
        _ => format!("{}{}", repeat, col_type.code() as char),
    }
}

/// Describes one column of a binary table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name (TTYPEn).
    pub name: String,
    /// Repeat count from TFORMn.
    pub repeat: usize,
    pub col_type: ColumnType,
    /// Bytes this column occupies per row.
    pub byte_width: usize,
}

impl ColumnDescriptor {
    pub fn new(name: &str, repeat: usize, col_type: ColumnType) -> Self {
        ColumnDescriptor {
            name: String::from(name),
            repeat,
            col_type,
            byte_width: byte_width(repeat, col_type),
        }
    }

    /// A `1PB` column: one variable-length byte array per row.
    pub fn var_bytes(name: &str) -> Self {
        ColumnDescriptor::new(name, 1, ColumnType::VarArrayP(b'B'))
    }

    pub fn from_tform(name: &str, tform: &str) -> Result<Self> {
        let (repeat, col_type) = parse_tform(tform)?;
        Ok(ColumnDescriptor::new(name, repeat, col_type))
    }

    pub fn tform(&self) -> String {
        tform_string(self.repeat, self.col_type)
    }
}

/// A binary table held in memory: fixed-width rows and the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTable {
    columns: Vec<ColumnDescriptor>,
    offsets: Vec<usize>,
    row_width: usize,
    rows: usize,
    data: Vec<u8>,
    heap: Heap,
}

impl BinaryTable {
    /// An empty table with the given columns.
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        BinaryTable::with_heap(columns, Heap::new())
    }

    /// An empty table whose heap uses a custom capacity.
    pub fn with_heap(columns: Vec<ColumnDescriptor>, heap: Heap) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut row_width = 0;
        for col in &columns {
            offsets.push(row_width);
            row_width += col.byte_width;
        }
        BinaryTable {
            columns,
            offsets,
            row_width,
            rows: 0,
            data: Vec::new(),
            heap,
        }
    }

    /// Build a table from fixed-row bytes (big-endian, as on disk).
    pub fn from_rows(columns: Vec<ColumnDescriptor>, rows: usize, data: Vec<u8>) -> Result<Self> {
        let mut table = BinaryTable::new(columns);
        if data.len() != rows * table.row_width {
            return Err(Error::UnexpectedEof);
        }
        table.rows = rows;
        table.data = data;
        Ok(table)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// NAXIS1: bytes per row.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn row_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Append a zero-filled row and return its index.
    pub fn add_row(&mut self) -> usize {
        self.data.resize(self.data.len() + self.row_width, 0);
        self.rows += 1;
        self.rows - 1
    }

    fn cell_range(&self, row: usize, col: usize) -> Result<std::ops::Range<usize>> {
        if row >= self.rows || col >= self.columns.len() {
            return Err(Error::InvalidValue);
        }
        let start = row * self.row_width + self.offsets[col];
        Ok(start..start + self.columns[col].byte_width)
    }

    /// Raw bytes of one fixed-width cell.
    pub fn cell(&self, row: usize, col: usize) -> Result<&[u8]> {
        let range = self.cell_range(row, col)?;
        Ok(&self.data[range])
    }

    pub fn cell_mut(&mut self, row: usize, col: usize) -> Result<&mut [u8]> {
        let range = self.cell_range(row, col)?;
        Ok(&mut self.data[range])
    }

    /// Concatenated bytes of column `col` over `rows`.
    pub fn column_bytes(&self, col: usize, rows: std::ops::Range<usize>) -> Result<Vec<u8>> {
        let width = self.columns.get(col).ok_or(Error::InvalidValue)?.byte_width;
        let mut out = Vec::with_capacity(width * rows.len());
        for row in rows {
            out.extend_from_slice(self.cell(row, col)?);
        }
        Ok(out)
    }

    /// Write concatenated column bytes back, starting at `first_row`.
    pub fn set_column_bytes(&mut self, col: usize, first_row: usize, bytes: &[u8]) -> Result<()> {
        let width = self.columns.get(col).ok_or(Error::InvalidValue)?.byte_width;
        if width == 0 {
            return Ok(());
        }
        for (i, chunk) in bytes.chunks(width).enumerate() {
            let cell = self.cell_mut(first_row + i, col)?;
            if chunk.len() != cell.len() {
                return Err(Error::DecompressionError("column bytes end mid-cell"));
            }
            cell.copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Heap descriptor stored in a variable-length cell.
    pub fn descriptor(&self, row: usize, col: usize) -> Result<HeapDescriptor> {
        let cell = self.cell(row, col)?;
        match self.columns[col].col_type {
            ColumnType::VarArrayP(_) => Ok(HeapDescriptor {
                len: read_u32_be(cell) as u64,
                offset: read_u32_be(&cell[4..]) as u64,
            }),
            ColumnType::VarArrayQ(_) => Ok(HeapDescriptor {
                len: read_u64_be(cell),
                offset: read_u64_be(&cell[8..]),
            }),
            _ => Err(Error::InvalidValue),
        }
    }

    fn set_descriptor(&mut self, row: usize, col: usize, desc: HeapDescriptor) -> Result<()> {
        let col_type = self.columns.get(col).ok_or(Error::InvalidValue)?.col_type;
        let cell = self.cell_mut(row, col)?;
        match col_type {
            ColumnType::VarArrayP(_) => {
                let len = u32::try_from(desc.len).map_err(|_| Error::InvalidValue)?;
                let offset = u32::try_from(desc.offset).map_err(|_| Error::InvalidValue)?;
                write_u32_be(cell, len);
                write_u32_be(&mut cell[4..], offset);
            }
            ColumnType::VarArrayQ(_) => {
                write_u64_be(cell, desc.len);
                write_u64_be(&mut cell[8..], desc.offset);
            }
            _ => return Err(Error::InvalidValue),
        }
        Ok(())
    }

    /// Store `bytes` on the heap and point the cell at them.
    pub fn put_var(&mut self, row: usize, col: usize, bytes: &[u8]) -> Result<HeapDescriptor> {
        let desc = self.heap.put(bytes)?;
        self.set_descriptor(row, col, desc)?;
        Ok(desc)
    }

    /// Heap bytes of a variable-length cell (empty for a null descriptor).
    pub fn var_cell(&self, row: usize, col: usize) -> Result<&[u8]> {
        let desc = self.descriptor(row, col)?;
        if desc.is_empty() {
            return Ok(&[]);
        }
        self.heap.cell(desc)
    }

    /// First element of a `D` cell.
    pub fn f64_cell(&self, row: usize, col: usize) -> Result<f64> {
        match self.columns.get(col).map(|c| c.col_type) {
            Some(ColumnType::Double) => Ok(read_f64_be(self.cell(row, col)?)),
            _ => Err(Error::InvalidValue),
        }
    }

    /// Integer cell of an `I`, `J` or `K` column.
    pub fn i64_cell(&self, row: usize, col: usize) -> Result<i64> {
        match self.columns.get(col).map(|c| c.col_type) {
            Some(ColumnType::Short) => Ok(i64::from(read_i16_be(self.cell(row, col)?))),
            Some(ColumnType::Int) => Ok(i64::from(read_i32_be(self.cell(row, col)?))),
            Some(ColumnType::Long) => Ok(read_i64_be(self.cell(row, col)?)),
            _ => Err(Error::InvalidValue),
        }
    }

    pub fn set_f64_cell(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        match self.columns.get(col).map(|c| c.col_type) {
            Some(ColumnType::Double) => {
                write_f64_be(self.cell_mut(row, col)?, value);
                Ok(())
            }
            _ => Err(Error::InvalidValue),
        }
    }

    /// Mandatory BINTABLE cards followed by TTYPEn/TFORMn per column.
    pub fn header_cards(&self) -> Vec<Card> {
        let mut cards = vec![
            Card::new("XTENSION", Value::String(String::from("BINTABLE")))
                .with_comment("binary table extension"),
            Card::new("BITPIX", Value::Integer(8)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("NAXIS1", Value::Integer(self.row_width as i64)),
            Card::new("NAXIS2", Value::Integer(self.rows as i64)),
            Card::new("PCOUNT", Value::Integer(self.heap.size() as i64)),
            Card::new("GCOUNT", Value::Integer(1)),
            Card::new("TFIELDS", Value::Integer(self.columns.len() as i64)),
        ];
        for (i, col) in self.columns.iter().enumerate() {
            let n = i + 1;
            cards.push(Card::new(
                &format!("TTYPE{n}"),
                Value::String(col.name.clone()),
            ));
            cards.push(Card::new(&format!("TFORM{n}"), Value::String(col.tform())));
        }
        cards
    }

    /// Column descriptors declared by a BINTABLE header.
    pub fn columns_from_header(header: &Header) -> Result<Vec<ColumnDescriptor>> {
        let tfields = header.require_int("TFIELDS")?;
        let tfields = usize::try_from(tfields).map_err(|_| Error::InvalidValue)?;
        (1..=tfields)
            .map(|n| {
                let tform_key = format!("TFORM{n}");
                let tform = header.require_string(&tform_key)?;
                let name = header.string(&format!("TTYPE{n}")).unwrap_or("");
                ColumnDescriptor::from_tform(name, tform)
            })
            .collect()
    }

    /// Rebuild a table from its header and data unit (rows, gap, heap).
    ///
    /// The heap starts at `THEAP` when present, otherwise right after the
    /// last row.
    pub fn from_data_unit(header: &Header, data: &[u8]) -> Result<Self> {
        let columns = BinaryTable::columns_from_header(header)?;
        let naxis1 = header.require_int("NAXIS1")?;
        let naxis2 = header.require_int("NAXIS2")?;
        let pcount = header.int("PCOUNT").unwrap_or(0);
        let (naxis1, rows, pcount) = (
            usize::try_from(naxis1).map_err(|_| Error::InvalidValue)?,
            usize::try_from(naxis2).map_err(|_| Error::InvalidValue)?,
            usize::try_from(pcount).map_err(|_| Error::InvalidValue)?,
        );

        let mut table = BinaryTable::new(columns);
        if table.row_width != naxis1 {
            return Err(Error::InvalidHeader);
        }
        let fixed = naxis1 * rows;
        let theap = match header.int("THEAP") {
            Some(t) => usize::try_from(t).map_err(|_| Error::InvalidValue)?,
            None => fixed,
        };
        if theap < fixed || theap > fixed + pcount || fixed + pcount > data.len() {
            return Err(Error::UnexpectedEof);
        }
        table.rows = rows;
        table.data = data[..fixed].to_vec();
        table.heap = Heap::from_bytes(data[theap..fixed + pcount].to_vec());
        Ok(table)
    }
}
