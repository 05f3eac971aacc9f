use fitsio_tiled::compressed_table::default_algorithm;
use fitsio_tiled::hdu::CompressedHdu;
use fitsio_tiled::header::Card;
use fitsio_tiled::image::{tile_encodings, ImageLayout};
use fitsio_tiled::tile::TileEncoding;
use std::process;

fn format_image(hdu: &CompressedHdu) -> Result<String, String> {
    let layout = ImageLayout::from_header(&hdu.header).map_err(|e| e.to_string())?;
    let tiles = layout.tiles().map_err(|e| e.to_string())?;
    let encodings = tile_encodings(hdu).map_err(|e| e.to_string())?;
    let count = |wanted: TileEncoding| encodings.iter().filter(|&&e| e == wanted).count();

    let mut out = String::new();
    out.push_str("Compressed image\n");
    out.push_str(&format!("  ZBITPIX: {}\n", layout.element_type.bitpix()));
    if layout.image_type != layout.element_type {
        out.push_str(&format!("  Samples: {:?} (BZERO offset)\n", layout.image_type));
    }
    out.push_str(&format!("  Dimensions: {:?}\n", layout.axes));
    out.push_str(&format!("  Tile shape: {:?}\n", layout.tile_shape));
    out.push_str(&format!("  Algorithm: {}\n", layout.algorithm));
    if let Some(q) = layout.quantizer {
        out.push_str(&format!(
            "  Quantization: {} (ZDITHER0 = {}, ZBLANK = {})\n",
            q.method.name(),
            q.dither_seed,
            q.blank
        ));
    }
    out.push_str(&format!("  Tiles: {}\n", tiles.len()));
    out.push_str(&format!(
        "  Stored: {} compressed, {} gzip, {} uncompressed\n",
        count(TileEncoding::Compressed),
        count(TileEncoding::Gzip),
        count(TileEncoding::Uncompressed)
    ));
    out.push_str(&format!("  Heap size: {} bytes\n", hdu.table.heap().size()));
    Ok(out)
}

fn format_table(hdu: &CompressedHdu) -> String {
    let h = &hdu.header;
    let mut out = String::new();
    out.push_str("Compressed table\n");
    out.push_str(&format!("  Rows: {}\n", h.int("ZNAXIS2").unwrap_or(0)));
    out.push_str(&format!("  Rows per tile: {}\n", h.int("ZTILELEN").unwrap_or(0)));
    for (i, col) in hdu.table.columns().iter().enumerate() {
        let n = i + 1;
        let zform = h.string(&format!("ZFORM{n}")).unwrap_or("?");
        let algorithm = h
            .string(&format!("ZCTYP{n}"))
            .map(String::from)
            .unwrap_or_else(|| default_algorithm(col).to_string());
        out.push_str(&format!("  Column {n} {}: {zform} ({algorithm})\n", col.name));
    }
    out.push_str(&format!("  Heap size: {} bytes\n", hdu.table.heap().size()));
    out
}

fn format_verbose_cards(cards: &[Card]) -> String {
    let mut out = String::new();
    out.push_str("  Header cards:\n");
    for card in cards {
        let kw = card.keyword_str();
        match (&card.value, &card.comment) {
            (Some(val), Some(comment)) => out.push_str(&format!("    {} = {:?} / {}\n", kw, val, comment)),
            (Some(val), None) => out.push_str(&format!("    {} = {:?}\n", kw, val)),
            (None, Some(comment)) => out.push_str(&format!("    {} {}\n", kw, comment)),
            (None, None) => out.push_str(&format!("    {}\n", kw)),
        }
    }
    out
}

fn run(args: &[String]) -> Result<String, String> {
    let mut verbose = false;
    let mut file_path = None;

    for arg in args {
        if arg == "-v" || arg == "--verbose" {
            verbose = true;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            if file_path.is_some() {
                return Err("Too many arguments".to_string());
            }
            file_path = Some(arg.as_str());
        }
    }

    let path = file_path.ok_or_else(|| {
        "Usage: tileinfo [-v] <file.fits>\n\nDescribe the first tile-compressed HDU of a FITS file."
            .to_string()
    })?;

    let file = std::fs::File::open(path).map_err(|e| format!("Error reading '{}': {}", path, e))?;
    let hdu = CompressedHdu::read_from(std::io::BufReader::new(file))
        .map_err(|e| format!("Error parsing '{}': {}", path, e))?;
    log::debug!("{} header cards, {} table rows", hdu.header.len(), hdu.table.rows());

    let mut out = if hdu.is_image() {
        format_image(&hdu)?
    } else {
        format_table(&hdu)
    };
    if verbose {
        out.push_str(&format_verbose_cards(hdu.header.cards()));
    }
    Ok(out)
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(output) => print!("{}", output),
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsio_tiled::header::Header;
    use fitsio_tiled::image::{compress_image, CompressionConfig};
    use fitsio_tiled::value::Value;
    use fitsio_tiled::{Algorithm, ImageData, TilePool};

    fn compressed_file() -> tempfile::NamedTempFile {
        let header = Header::from_cards(vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("NAXIS1", Value::Integer(32)),
            Card::new("NAXIS2", Value::Integer(8)),
        ]);
        let data = ImageData::I16((0..256).collect());
        let pool = TilePool::new(1).unwrap();
        let config = CompressionConfig::new(Algorithm::Rice1).tile_shape(&[32, 4]);
        let hdu = compress_image(&header, &data, &config, &pool).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        hdu.write_to(file.as_file()).unwrap();
        file
    }

    #[test]
    fn describes_compressed_image() {
        let file = compressed_file();
        let out = run(&[file.path().display().to_string()]).unwrap();
        assert!(out.contains("Compressed image"));
        assert!(out.contains("Algorithm: RICE_1"));
        assert!(out.contains("Tiles: 2"));
        assert!(!out.contains("Header cards"));

        let out = run(&["-v".to_string(), file.path().display().to_string()]).unwrap();
        assert!(out.contains("ZCMPTYPE"));
    }

    #[test]
    fn usage_and_bad_options() {
        assert!(run(&[]).unwrap_err().starts_with("Usage"));
        assert!(run(&["--bogus".to_string()]).unwrap_err().contains("Unknown option"));
        assert!(run(&["a".to_string(), "b".to_string()]).is_err());
    }
}
