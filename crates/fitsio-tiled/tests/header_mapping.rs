//! Keyword backup and restore across the mapping table.

use fitsio_tiled::header::{Card, Header};
use fitsio_tiled::image::{compress_image, decompress_image, CompressionConfig, DEFAULT_EXTNAME};
use fitsio_tiled::keywords::{backup, backup_header, restore, restore_header, KeywordKind, MappingRule, MAPPINGS};
use fitsio_tiled::value::Value;
use fitsio_tiled::{Algorithm, ImageData, QuantizeLevel, Quantization, TilePool};

fn names(plain: &str, kind: KeywordKind) -> Vec<String> {
    match kind {
        KeywordKind::Fixed => vec![plain.to_string()],
        KeywordKind::Indexed => [1, 2, 9, 10, 999].iter().map(|n| format!("{plain}{n}")).collect(),
    }
}

#[test]
fn every_renamed_keyword_round_trips() {
    let mut checked = 0;
    for entry in MAPPINGS.iter().filter(|e| e.rule == MappingRule::Renamed) {
        for name in names(entry.plain, entry.kind) {
            let original = Card::new(&name, Value::Integer(7)).with_comment("kept");
            let mut compressed = Header::new();
            assert_eq!(backup(&original, &mut compressed, 0), 1, "{name}");
            let stored = &compressed.cards()[0];
            assert!(stored.keyword_str().starts_with(entry.compressed), "{name} stored as {}", stored.keyword_str());
            assert_eq!(stored.value, original.value);

            let mut plain = Header::new();
            assert_eq!(restore(stored, &mut plain, 0), 1, "{name}");
            assert_eq!(plain.cards(), &[original][..]);
            checked += 1;
        }
    }
    assert!(checked > 10);
}

#[test]
fn compression_keywords_never_reach_the_plain_header() {
    for entry in MAPPINGS
        .iter()
        .filter(|e| matches!(e.rule, MappingRule::CompressionParameter | MappingRule::Structural))
    {
        for name in names(entry.compressed, entry.kind) {
            let card = Card::new(&name, Value::Integer(1));
            let mut plain = Header::new();
            assert_eq!(restore(&card, &mut plain, 0), 0, "{name}");
            assert!(plain.is_empty());
            let mut compressed = Header::new();
            assert_eq!(backup(&card, &mut compressed, 0), 0, "{name}");
        }
    }
}

#[test]
fn unmapped_keywords_pass_through() {
    let cards = [
        Card::new("OBJECT", Value::String("NGC 1275".into())),
        Card::new("EXPTIME", Value::Float(300.5)).with_comment("seconds"),
        Card::new("DATE-OBS", Value::String("2024-03-01T12:00:00".into())),
        Card::commentary("HISTORY", "flat fielded"),
        Card::commentary("COMMENT", "second pass"),
        Card::new("ZODIAC", Value::Logical(false)),
    ];
    for card in cards {
        let mut compressed = Header::new();
        assert_eq!(backup(&card, &mut compressed, 0), 1);
        assert_eq!(compressed.cards()[0], card);
        let mut plain = Header::new();
        assert_eq!(restore(&compressed.cards()[0], &mut plain, 0), 1);
        assert_eq!(plain.cards()[0], card);
    }
}

#[test]
fn insertion_index_is_honoured() {
    let mut compressed = Header::from_cards(vec![
        Card::new("A", Value::Integer(1)),
        Card::new("B", Value::Integer(2)),
    ]);
    let next = backup(&Card::new("BITPIX", Value::Integer(16)), &mut compressed, 1);
    assert_eq!(next, 2);
    let next = backup(&Card::new("NAXIS", Value::Integer(2)), &mut compressed, next);
    assert_eq!(next, 3);
    let order: Vec<&str> = compressed.iter().map(Card::keyword_str).collect();
    assert_eq!(order, ["A", "ZBITPIX", "ZNAXIS", "B"]);
}

#[test]
fn whole_header_round_trip() {
    let plain = Header::from_cards(vec![
        Card::new("XTENSION", Value::String("IMAGE".into())),
        Card::new("BITPIX", Value::Integer(-64)),
        Card::new("NAXIS", Value::Integer(1)),
        Card::new("NAXIS1", Value::Integer(10)),
        Card::new("PCOUNT", Value::Integer(0)),
        Card::new("GCOUNT", Value::Integer(1)),
        Card::new("EXTNAME", Value::String("SCI".into())),
        Card::commentary("HISTORY", "created"),
        Card::new("CHECKSUM", Value::String("0000000000000000".into())),
    ]);
    let mut compressed = Header::new();
    backup_header(&plain, &mut compressed);
    assert_eq!(compressed.string("ZTENSION"), Some("IMAGE"));
    assert_eq!(compressed.string("ZHECKSUM"), Some("0000000000000000"));
    assert!(compressed.get("BITPIX").is_none());
    assert_eq!(restore_header(&compressed), plain);
}

#[test]
fn default_extname_is_not_restored() {
    let pool = TilePool::new(1).unwrap();
    let plain = Header::from_cards(vec![
        Card::new("SIMPLE", Value::Logical(true)),
        Card::new("BITPIX", Value::Integer(-32)),
        Card::new("NAXIS", Value::Integer(2)),
        Card::new("NAXIS1", Value::Integer(8)),
        Card::new("NAXIS2", Value::Integer(8)),
        Card::new("TELESCOP", Value::String("JWST".into())),
    ]);
    let data = ImageData::F32((0..64).map(|i| i as f32 * 0.25).collect());
    let config = CompressionConfig::new(Algorithm::Hcompress1)
        .tile_shape(&[8, 4])
        .quantize(Quantization::SubtractiveDither1, QuantizeLevel::Fixed { scale: 0.05, zero: 0.0 });
    let hdu = compress_image(&plain, &data, &config, &pool).unwrap();
    assert_eq!(hdu.header.string("EXTNAME"), Some(DEFAULT_EXTNAME));
    assert_eq!(hdu.header.logical("ZSIMPLE"), Some(true));
    assert_eq!(hdu.header.string("XTENSION"), Some("BINTABLE"));

    let (restored, _) = decompress_image(&hdu, &pool).unwrap();
    assert_eq!(restored, plain);
    assert!(restored.get("ZQUANTIZ").is_none());
    assert!(restored.get("EXTNAME").is_none());
}
