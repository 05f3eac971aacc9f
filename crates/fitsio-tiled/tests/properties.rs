//! Properties of tiling, tile storage and the heap.

use fitsio_tiled::codec::gzip::GzipCodec;
use fitsio_tiled::codec::TileCodec;
use fitsio_tiled::geometry::{gather, plan_tiles};
use fitsio_tiled::header::{Card, Header};
use fitsio_tiled::heap::Heap;
use fitsio_tiled::image::{
    compress_image, decompress_image, tile_encodings, CompressionConfig, COMPRESSED_DATA, GZIP_COMPRESSED_DATA,
    UNCOMPRESSED_DATA,
};
use fitsio_tiled::value::Value;
use fitsio_tiled::{Algorithm, Error, ImageData, TileArea, TileEncoding, TilePool};
use proptest::prelude::*;

fn header(bitpix: i64, axes: &[usize]) -> Header {
    let mut header = Header::new();
    header.push(Card::new("SIMPLE", Value::Logical(true)));
    header.push(Card::new("BITPIX", Value::Integer(bitpix)));
    header.push(Card::new("NAXIS", Value::Integer(axes.len() as i64)));
    for (i, len) in axes.iter().enumerate() {
        header.push(Card::new(&format!("NAXIS{}", i + 1), Value::Integer(*len as i64)));
    }
    header
}

fn axes_and_tile() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec((1usize..12, 1usize..15), 1..4)
        .prop_map(|dims| dims.into_iter().unzip::<_, _, Vec<_>, Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tiles_partition_the_array((axes, tile) in axes_and_tile()) {
        let total: usize = axes.iter().product();
        let areas = plan_tiles(&axes, &tile).unwrap();
        let expected: usize = axes.iter().zip(&tile).map(|(a, t)| a.div_ceil(*t)).product();
        prop_assert_eq!(areas.len(), expected);

        let index: Vec<usize> = (0..total).collect();
        let mut seen = vec![0u8; total];
        for area in &areas {
            prop_assert!(!area.is_empty());
            for (axis, (s, e)) in area.start.iter().zip(&area.end).enumerate() {
                prop_assert!(e - s <= tile[axis]);
                prop_assert!(*e <= axes[axis]);
            }
            for i in gather(area, &axes, &index) {
                seen[i] += 1;
            }
        }
        prop_assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn lossless_round_trip((axes, tile) in axes_and_tile(), seed in any::<u64>(), rice in any::<bool>()) {
        let pool = TilePool::new(2).unwrap();
        let mut rng = fastrand::Rng::with_seed(seed);
        let len: usize = axes.iter().product();
        let data = ImageData::I16((0..len).map(|_| rng.i16(-300..300)).collect());
        let algorithm = if rice { Algorithm::Rice1 } else { Algorithm::Gzip2 };
        let config = CompressionConfig::new(algorithm).tile_shape(&tile);
        let hdu = compress_image(&header(16, &axes), &data, &config, &pool).unwrap();
        prop_assert_eq!(decompress_image(&hdu, &pool).unwrap().1, data);
    }

    #[test]
    fn compressed_tiles_beat_gzip(seed in any::<u64>(), spread in 1i32..i32::MAX) {
        let pool = TilePool::new(2).unwrap();
        let axes = [40usize, 6];
        let mut rng = fastrand::Rng::with_seed(seed);
        let values: Vec<i32> = (0..240).map(|_| rng.i32(-spread / 2..=spread / 2)).collect();
        let data = ImageData::I32(values.clone());
        let hdu = compress_image(&header(32, &axes), &data, &CompressionConfig::new(Algorithm::Rice1), &pool).unwrap();

        let compressed = hdu.table.column_index(COMPRESSED_DATA).unwrap();
        let gzip_column = hdu.table.column_index(GZIP_COMPRESSED_DATA);
        let areas = plan_tiles(&axes, &[40, 1]).unwrap();
        for (tile, encoding) in tile_encodings(&hdu).unwrap().into_iter().enumerate() {
            let samples = ImageData::I32(gather(&areas[tile], &axes, &values));
            let gzipped = GzipCodec.compress(&samples, &areas[tile].shape()).unwrap();
            match encoding {
                TileEncoding::Compressed => {
                    prop_assert!(hdu.table.var_cell(tile, compressed).unwrap().len() < gzipped.len());
                }
                TileEncoding::Gzip => {
                    let col = gzip_column.unwrap();
                    prop_assert!(hdu.table.var_cell(tile, compressed).unwrap().is_empty());
                    prop_assert_eq!(hdu.table.var_cell(tile, col).unwrap(), &gzipped[..]);
                }
                TileEncoding::Uncompressed => prop_assert!(false, "no tile was forced raw"),
            }
        }
        prop_assert_eq!(decompress_image(&hdu, &pool).unwrap().1, data);
    }
}

// ---------------------------------------------------------------------------
// Fallback storage
// ---------------------------------------------------------------------------

#[test]
fn unrepresentable_tiles_are_gzipped() {
    let pool = TilePool::new(2).unwrap();
    let axes = [50, 4];
    let mut rng = fastrand::Rng::with_seed(99);
    let data = ImageData::I32((0..200).map(|_| rng.i32(..)).collect());
    let hdu = compress_image(&header(32, &axes), &data, &CompressionConfig::new(Algorithm::Plio1), &pool).unwrap();
    assert!(tile_encodings(&hdu).unwrap().iter().all(|&e| e == TileEncoding::Gzip));
    let compressed = hdu.table.column_index(COMPRESSED_DATA).unwrap();
    for row in 0..hdu.table.rows() {
        assert!(hdu.table.var_cell(row, compressed).unwrap().is_empty());
    }
    assert_eq!(decompress_image(&hdu, &pool).unwrap().1, data);
}

#[test]
fn uniform_random_images_are_gzipped() {
    let pool = TilePool::new(4).unwrap();
    let axes = [100, 100];
    let mut rng = fastrand::Rng::with_seed(2718);
    let images = [
        (8, ImageData::U8((0..10_000).map(|_| rng.u8(..)).collect())),
        (16, ImageData::I16((0..10_000).map(|_| rng.i16(..)).collect())),
        (32, ImageData::I32((0..10_000).map(|_| rng.i32(..)).collect())),
    ];
    for (bitpix, data) in images {
        let hdu = compress_image(&header(bitpix, &axes), &data, &CompressionConfig::new(Algorithm::Rice1), &pool)
            .unwrap();
        let encodings = tile_encodings(&hdu).unwrap();
        assert_eq!(encodings.len(), 100);
        assert!(encodings.iter().all(|&e| e == TileEncoding::Gzip), "BITPIX {bitpix}");
        assert_eq!(decompress_image(&hdu, &pool).unwrap().1, data, "BITPIX {bitpix}");
    }
}

#[test]
fn forced_regions_are_stored_raw() {
    let pool = TilePool::new(2).unwrap();
    let axes = [30, 30];
    let data = ImageData::I16((0..900).map(|i| (i % 30) as i16).collect());
    let config = CompressionConfig::new(Algorithm::Rice1)
        .tile_shape(&[10, 10])
        .force_no_loss(TileArea::new(&[12, 12], &[15, 15]));
    let hdu = compress_image(&header(16, &axes), &data, &config, &pool).unwrap();
    let encodings = tile_encodings(&hdu).unwrap();
    for (tile, encoding) in encodings.iter().enumerate() {
        if tile == 4 {
            assert_eq!(*encoding, TileEncoding::Uncompressed);
        } else {
            assert_ne!(*encoding, TileEncoding::Uncompressed, "tile {tile}");
        }
    }
    let raw = hdu.table.column_index(UNCOMPRESSED_DATA).unwrap();
    assert_eq!(hdu.table.var_cell(4, raw).unwrap().len(), 100 * 2);
    assert_eq!(decompress_image(&hdu, &pool).unwrap().1, data);
}

// ---------------------------------------------------------------------------
// Heap capacity
// ---------------------------------------------------------------------------

#[test]
fn heap_accepts_exactly_its_limit() {
    let mut heap = Heap::with_limit(10);
    heap.put(&[1; 6]).unwrap();
    heap.put(&[2; 4]).unwrap();
    assert_eq!(heap.size(), 10);
    assert!(matches!(
        heap.put(&[3]),
        Err(Error::HeapTooLarge { requested: 11, limit: 10 })
    ));
    assert_eq!(heap.size(), 10);
}

#[test]
fn image_heap_limit() {
    let pool = TilePool::new(3).unwrap();
    let axes = [64, 16];
    let data = ImageData::I32((0..1024).map(|i| i * 37 % 1000).collect());
    let config = CompressionConfig::new(Algorithm::Gzip1).tile_shape(&[64, 4]);
    let hdu = compress_image(&header(32, &axes), &data, &config, &pool).unwrap();
    let size = hdu.table.heap().size();

    let exact = compress_image(&header(32, &axes), &data, &config.clone().heap_limit(size), &pool).unwrap();
    assert_eq!(exact.table.heap().size(), size);
    match compress_image(&header(32, &axes), &data, &config.heap_limit(size - 1), &pool) {
        Err(Error::HeapTooLarge { limit, .. }) => assert_eq!(limit, size - 1),
        other => panic!("unexpected {other:?}"),
    }
}
