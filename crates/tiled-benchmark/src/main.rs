use std::time::Instant;

use fitsio_tiled::header::{Card, Header};
use fitsio_tiled::image::{compress_image, decompress_image, tile_encodings, CompressionConfig};
use fitsio_tiled::value::Value;
use fitsio_tiled::{Algorithm, ImageData, QuantizeLevel, Quantization, TileEncoding, TilePool};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

struct BenchResult {
    label: String,
    compress_ms: f64,
    decompress_ms: f64,
    compress_mpx_per_sec: f64,
    decompress_mpx_per_sec: f64,
    ratio: f64,
    gzip_tiles: usize,
}

fn time_iterations<F: FnMut()>(mut f: F, iterations: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    start.elapsed().as_secs_f64() * 1000.0 / iterations as f64
}

// ---------------------------------------------------------------------------
// Synthetic images: a smooth gradient plus a little noise
// ---------------------------------------------------------------------------

fn noise(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state >> 40
}

fn generate_f32(shape: &[usize]) -> Vec<f32> {
    let mut state: u64 = 0xdeadbeef;
    let width = shape[0];
    (0..shape.iter().product::<usize>())
        .map(|i| (i % width) as f32 * 0.5 + (noise(&mut state) % 1000) as f32 * 0.001)
        .collect()
}

fn generate_i16(shape: &[usize]) -> Vec<i16> {
    let mut state: u64 = 0xdeadbeef;
    let width = shape[0];
    (0..shape.iter().product::<usize>())
        .map(|i| ((i % width) / 4) as i16 + (noise(&mut state) % 8) as i16)
        .collect()
}

fn generate_i32(shape: &[usize]) -> Vec<i32> {
    let mut state: u64 = 0xdeadbeef;
    let width = shape[0];
    (0..shape.iter().product::<usize>())
        .map(|i| (i / width) as i32 * 1000 + (noise(&mut state) % 64) as i32)
        .collect()
}

fn image_header(bitpix: i64, shape: &[usize]) -> Header {
    let mut header = Header::new();
    header.push(Card::new("SIMPLE", Value::Logical(true)));
    header.push(Card::new("BITPIX", Value::Integer(bitpix)));
    header.push(Card::new("NAXIS", Value::Integer(shape.len() as i64)));
    for (i, len) in shape.iter().enumerate() {
        header.push(Card::new(&format!("NAXIS{}", i + 1), Value::Integer(*len as i64)));
    }
    header
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_config(
    pool: &TilePool,
    label: &str,
    header: &Header,
    data: &ImageData,
    config: &CompressionConfig,
    iterations: usize,
) -> Option<BenchResult> {
    let hdu = match compress_image(header, data, config, pool) {
        Ok(hdu) => hdu,
        Err(e) => {
            log::warn!("{label}: {e}");
            return None;
        }
    };
    let megapixels = data.len() as f64 / 1_000_000.0;
    let raw_bytes = (data.len() * data.element_type().size()) as f64;

    let compress_ms = time_iterations(|| drop(compress_image(header, data, config, pool)), iterations);
    let decompress_ms = time_iterations(|| drop(decompress_image(&hdu, pool)), iterations);
    let gzip_tiles = tile_encodings(&hdu)
        .map(|e| e.iter().filter(|&&t| t == TileEncoding::Gzip).count())
        .unwrap_or(0);

    Some(BenchResult {
        label: label.to_string(),
        compress_ms,
        decompress_ms,
        compress_mpx_per_sec: megapixels / (compress_ms / 1000.0),
        decompress_mpx_per_sec: megapixels / (decompress_ms / 1000.0),
        ratio: raw_bytes / hdu.table.heap().size().max(1) as f64,
        gzip_tiles,
    })
}

fn run_benchmarks(pool: &TilePool) -> Vec<BenchResult> {
    let mut results = Vec::new();

    let sizes: &[(&str, &[usize], usize)] = &[
        ("256x256", &[256, 256], 20),
        ("1024x1024", &[1024, 1024], 5),
        ("512x512x16", &[512, 512, 16], 2),
    ];

    for &(size_label, shape, iterations) in sizes {
        eprint!("  {size_label} ...");

        let i16_header = image_header(16, shape);
        let i16_data = ImageData::I16(generate_i16(shape));
        for algorithm in Algorithm::ALL {
            let config = CompressionConfig::new(algorithm);
            let label = format!("i16 {size_label} {algorithm}");
            results.extend(bench_config(pool, &label, &i16_header, &i16_data, &config, iterations));
        }

        let i32_header = image_header(32, shape);
        let i32_data = ImageData::I32(generate_i32(shape));
        for algorithm in [Algorithm::Rice1, Algorithm::Gzip2, Algorithm::Hcompress1] {
            let config = CompressionConfig::new(algorithm);
            let label = format!("i32 {size_label} {algorithm}");
            results.extend(bench_config(pool, &label, &i32_header, &i32_data, &config, iterations));
        }

        let f32_header = image_header(-32, shape);
        let f32_data = ImageData::F32(generate_f32(shape));
        let config = CompressionConfig::new(Algorithm::Rice1)
            .quantize(Quantization::SubtractiveDither1, QuantizeLevel::default());
        let label = format!("f32 {size_label} RICE_1 q=4");
        results.extend(bench_config(pool, &label, &f32_header, &f32_data, &config, iterations));
        let config = CompressionConfig::new(Algorithm::Gzip2);
        let label = format!("f32 {size_label} GZIP_2");
        results.extend(bench_config(pool, &label, &f32_header, &f32_data, &config, iterations));

        eprintln!(" done");
    }

    results
}

fn print_results(threads: usize, results: &[BenchResult]) {
    println!("\n### {threads} threads\n");
    println!(
        "| {:28} | {:>8} | {:>10} | {:>8} | {:>10} | {:>6} | {:>5} |",
        "Test", "Comp ms", "Comp MP/s", "Dec ms", "Dec MP/s", "Ratio", "Gzip"
    );
    println!(
        "|{:-<30}|{:->10}|{:->12}|{:->10}|{:->12}|{:->8}|{:->7}|",
        "", "", "", "", "", "", ""
    );
    for r in results {
        println!(
            "| {:28} | {:>8.2} | {:>10.1} | {:>8.2} | {:>10.1} | {:>6.2} | {:>5} |",
            r.label,
            r.compress_ms,
            r.compress_mpx_per_sec,
            r.decompress_ms,
            r.decompress_mpx_per_sec,
            r.ratio,
            r.gzip_tiles
        );
    }
}

fn main() {
    env_logger::init();

    let threads: usize = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(0);
    let pool = match TilePool::new(threads) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("cannot start tile pool: {e}");
            std::process::exit(1);
        }
    };

    println!("# Tiled compression benchmark\n");
    println!("Compresses and decompresses synthetic images with every algorithm.");
    println!("MP/s = megapixels per second; Gzip = tiles that fell back to gzip.\n");

    let results = run_benchmarks(&pool);
    print_results(pool.threads(), &results);
}
