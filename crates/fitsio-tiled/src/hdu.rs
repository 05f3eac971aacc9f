//! Compressed HDUs as FITS bytes.
//!
//! A [`CompressedHdu`] is a `BINTABLE` extension: header blocks, the fixed
//! rows, the heap, and zero padding to the next block. A file written by
//! [`CompressedHdu::write_to`] starts with an empty primary HDU.

use crate::block::{pad_to_block, padded_byte_len, DATA_PAD_BYTE};
use crate::error::{Error, Result};
use crate::header::{Card, Header};
use crate::table::BinaryTable;
use crate::value::Value;

/// A tile-compressed image or table: its header and its binary table.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedHdu {
    pub header: Header,
    pub table: BinaryTable,
}

fn data_len(header: &Header) -> Result<usize> {
    let size = |name| usize::try_from(header.require_int(name)?).map_err(|_| Error::InvalidValue);
    let pcount = usize::try_from(header.int("PCOUNT").unwrap_or(0)).map_err(|_| Error::InvalidValue)?;
    if header.require_int("NAXIS")? == 0 {
        return Ok(0);
    }
    size("NAXIS1")?
        .checked_mul(size("NAXIS2")?)
        .and_then(|n| n.checked_add(pcount))
        .ok_or(Error::InvalidValue)
}

impl CompressedHdu {
    pub fn new(header: Header, table: BinaryTable) -> Self {
        CompressedHdu { header, table }
    }

    /// Whether the header marks a compressed image (`ZIMAGE = T`).
    pub fn is_image(&self) -> bool {
        self.header.logical("ZIMAGE") == Some(true)
    }

    /// Whether the header marks a compressed table (`ZTABLE = T`).
    pub fn is_table(&self) -> bool {
        self.header.logical("ZTABLE") == Some(true)
    }

    /// The extension as FITS bytes, padded to whole blocks.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.header.to_bytes();
        let start = buf.len();
        buf.extend_from_slice(self.table.row_bytes());
        buf.extend_from_slice(self.table.heap().as_bytes());
        pad_to_block(&mut buf, start, DATA_PAD_BYTE);
        buf
    }

    /// Parse one extension from the start of `data`.
    ///
    /// Returns the HDU and the number of bytes it occupied.
    pub fn parse(data: &[u8]) -> Result<(CompressedHdu, usize)> {
        let (header, header_len) = Header::parse(data)?;
        if header.string("XTENSION") != Some("BINTABLE") {
            return Err(Error::InvalidHeader);
        }
        let len = data_len(&header)?;
        let end = header_len.checked_add(len).ok_or(Error::InvalidValue)?;
        if end > data.len() {
            return Err(Error::UnexpectedEof);
        }
        let table = BinaryTable::from_data_unit(&header, &data[header_len..end])?;
        Ok((CompressedHdu { header, table }, header_len + padded_byte_len(len)))
    }

    /// Write a complete FITS file: an empty primary HDU and this extension.
    pub fn write_to<W: std::io::Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&empty_primary().to_bytes())?;
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Read a FITS file and return its first compressed extension.
    pub fn read_from<R: std::io::Read>(mut reader: R) -> Result<CompressedHdu> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let (primary, header_len) = Header::parse(&data)?;
        if primary.logical("SIMPLE") != Some(true) {
            return Err(Error::InvalidHeader);
        }
        let mut pos = header_len + padded_byte_len(primary_data_len(&primary)?);
        while pos < data.len() {
            let (hdu, used) = match CompressedHdu::parse(&data[pos..]) {
                Ok(parsed) => parsed,
                Err(Error::InvalidHeader) => {
                    // Skip extensions that are not binary tables.
                    let (header, header_len) = Header::parse(&data[pos..])?;
                    pos += header_len + padded_byte_len(extension_data_len(&header)?);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if hdu.is_image() || hdu.is_table() {
                return Ok(hdu);
            }
            pos += used;
        }
        Err(Error::MissingKeyword(String::from("ZIMAGE")))
    }
}

fn empty_primary() -> Header {
    Header::from_cards(vec![
        Card::new("SIMPLE", Value::Logical(true)).with_comment("conforms to FITS standard"),
        Card::new("BITPIX", Value::Integer(8)),
        Card::new("NAXIS", Value::Integer(0)),
        Card::new("EXTEND", Value::Logical(true)),
    ])
}

fn samples(header: &Header) -> Result<usize> {
    let naxis = usize::try_from(header.require_int("NAXIS")?).map_err(|_| Error::InvalidValue)?;
    if naxis == 0 {
        return Ok(0);
    }
    (1..=naxis).try_fold(1usize, |acc, n| {
        let len = usize::try_from(header.require_int(&format!("NAXIS{n}"))?).map_err(|_| Error::InvalidValue)?;
        acc.checked_mul(len).ok_or(Error::InvalidValue)
    })
}

fn bytes_per_sample(header: &Header) -> Result<usize> {
    Ok((header.require_int("BITPIX")?.unsigned_abs() / 8) as usize)
}

fn primary_data_len(header: &Header) -> Result<usize> {
    Ok(samples(header)? * bytes_per_sample(header)?)
}

fn extension_data_len(header: &Header) -> Result<usize> {
    let pcount = usize::try_from(header.int("PCOUNT").unwrap_or(0)).map_err(|_| Error::InvalidValue)?;
    let gcount = usize::try_from(header.int("GCOUNT").unwrap_or(1)).map_err(|_| Error::InvalidValue)?;
    Ok(bytes_per_sample(header)? * gcount.max(1) * (pcount + samples(header)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use crate::table::ColumnDescriptor;

    fn sample_hdu() -> CompressedHdu {
        let mut table = BinaryTable::new(vec![ColumnDescriptor::var_bytes("COMPRESSED_DATA")]);
        for payload in [&b"first tile"[..], b"second", b""] {
            let row = table.add_row();
            table.put_var(row, 0, payload).unwrap();
        }
        let mut header = Header::from_cards(table.header_cards());
        header.push(Card::new("ZIMAGE", Value::Logical(true)));
        CompressedHdu::new(header, table)
    }

    #[test]
    fn bytes_round_trip() {
        let hdu = sample_hdu();
        let bytes = hdu.to_bytes();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        let (back, used) = CompressedHdu::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(back.table.var_cell(1, 0).unwrap(), b"second");
        assert_eq!(back.table.var_cell(2, 0).unwrap(), b"");
        assert_eq!(back.header, hdu.header);
    }

    #[test]
    fn file_round_trip() {
        let hdu = sample_hdu();
        let mut file = Vec::new();
        hdu.write_to(&mut file).unwrap();
        assert_eq!(file.len(), 3 * BLOCK_SIZE);
        let back = CompressedHdu::read_from(&file[..]).unwrap();
        assert!(back.is_image());
        assert_eq!(back.table.var_cell(0, 0).unwrap(), b"first tile");
    }

    #[test]
    fn truncated_data_is_an_error() {
        let bytes = sample_hdu().to_bytes();
        let header_only = BLOCK_SIZE;
        assert!(matches!(
            CompressedHdu::parse(&bytes[..header_only]),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn file_without_compressed_extension() {
        let mut file = empty_primary().to_bytes();
        let mut table = BinaryTable::new(vec![ColumnDescriptor::var_bytes("V")]);
        table.add_row();
        let plain = CompressedHdu::new(Header::from_cards(table.header_cards()), table);
        file.extend_from_slice(&plain.to_bytes());
        assert!(matches!(
            CompressedHdu::read_from(&file[..]),
            Err(Error::MissingKeyword(k)) if k == "ZIMAGE"
        ));
    }
}
