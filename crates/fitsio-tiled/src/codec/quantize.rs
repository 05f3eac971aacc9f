//! Quantization of floating-point tiles to 32-bit integers.
//!
//! `q = NINT((x - zero) / scale)`, optionally with subtractive dithering
//! from the standard 10000-entry random sequence. NaN samples become the
//! `ZBLANK` value, [`NULL_VALUE`] by default; with `SUBTRACTIVE_DITHER_2` exact zeros become
//! [`ZERO_VALUE`] so they are restored exactly.

use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Integer stored for NaN samples (`ZBLANK`).
pub const NULL_VALUE: i32 = -2147483647;
/// Integer stored for exact zeros under `SUBTRACTIVE_DITHER_2`.
pub const ZERO_VALUE: i32 = -2147483646;
/// Integers reserved at the bottom of the range for special values.
const N_RESERVED_VALUES: f64 = 10.0;
/// Default `q`: the quantization step is a quarter of the noise.
pub const DEFAULT_NOISE_LEVEL: f32 = 4.0;
/// Length of the dither random sequence.
pub const N_RANDOM: usize = 10000;

/// Quantization method, stored in `ZQUANTIZ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantization {
    NoDither,
    SubtractiveDither1,
    SubtractiveDither2,
}

impl Quantization {
    pub fn name(self) -> &'static str {
        match self {
            Quantization::NoDither => "NO_DITHER",
            Quantization::SubtractiveDither1 => "SUBTRACTIVE_DITHER_1",
            Quantization::SubtractiveDither2 => "SUBTRACTIVE_DITHER_2",
        }
    }

    /// Parse a `ZQUANTIZ` value. `NONE` means the floats were not quantized.
    pub fn parse(name: &str) -> Result<Option<Quantization>> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(None),
            "NO_DITHER" => Ok(Some(Quantization::NoDither)),
            "SUBTRACTIVE_DITHER_1" => Ok(Some(Quantization::SubtractiveDither1)),
            "SUBTRACTIVE_DITHER_2" => Ok(Some(Quantization::SubtractiveDither2)),
            other => Err(Error::UnsupportedAlgorithm(format!("ZQUANTIZ = '{other}'"))),
        }
    }

    fn dithered(self) -> bool {
        self != Quantization::NoDither
    }
}

/// How the quantization step is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuantizeLevel {
    /// Per-tile step of `noise / q`.
    Noise(f32),
    /// One step and offset for the whole image.
    Fixed { scale: f64, zero: f64 },
}

impl Default for QuantizeLevel {
    fn default() -> Self {
        QuantizeLevel::Noise(DEFAULT_NOISE_LEVEL)
    }
}

/// Everything needed to quantize or restore one tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    pub method: Quantization,
    pub level: QuantizeLevel,
    /// `ZDITHER0`, in `1..=10000`.
    pub dither_seed: i64,
    /// `ZBLANK`: the quantized value standing for NaN.
    pub blank: i32,
}

/// A quantized tile and the scale/zero that restore it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTile {
    pub values: Vec<i32>,
    pub scale: f64,
    pub zero: f64,
}

/// The standard random sequence: a Park-Miller generator with seed 1,
/// scaled to `(0, 1)`.
pub fn random_values() -> &'static [f32] {
    static VALUES: OnceLock<Vec<f32>> = OnceLock::new();
    VALUES.get_or_init(|| {
        const A: f64 = 16807.0;
        const M: f64 = 2147483647.0;
        let mut seed = 1.0f64;
        (0..N_RANDOM)
            .map(|_| {
                let temp = A * seed;
                seed = temp - M * (temp / M).trunc();
                (seed / M) as f32
            })
            .collect()
    })
}

/// Walks the random sequence for one tile.
struct Dither {
    iseed: usize,
    nextrand: usize,
    values: &'static [f32],
}

impl Dither {
    fn new(tile_index: usize, dither_seed: i64) -> Self {
        let values = random_values();
        let row = tile_index as i64 + dither_seed - 1;
        let iseed = row.rem_euclid(N_RANDOM as i64) as usize;
        Dither {
            iseed,
            nextrand: (values[iseed] * 500.0) as usize,
            values,
        }
    }

    fn current(&self) -> f64 {
        f64::from(self.values[self.nextrand])
    }

    fn advance(&mut self) {
        self.nextrand += 1;
        if self.nextrand == N_RANDOM {
            self.iseed = (self.iseed + 1) % N_RANDOM;
            self.nextrand = (self.values[self.iseed] * 500.0) as usize;
        }
    }
}

fn nint(x: f64) -> f64 {
    if x >= 0.0 {
        (x + 0.5).trunc()
    } else {
        (x - 0.5).trunc()
    }
}

/// Noise estimate from the median absolute second difference of the
/// non-NaN samples; 0 for fewer than 5 samples.
pub fn estimate_noise(samples: &[f64]) -> f64 {
    let good: Vec<f64> = samples.iter().copied().filter(|x| !x.is_nan()).collect();
    if good.len() < 5 {
        return 0.0;
    }
    let mut diffs: Vec<f64> = good
        .windows(5)
        .map(|w| (2.0 * w[2] - w[0] - w[4]).abs())
        .collect();
    diffs.sort_unstable_by(f64::total_cmp);
    let n = diffs.len();
    let median = if n % 2 == 1 {
        diffs[n / 2]
    } else {
        (diffs[n / 2 - 1] + diffs[n / 2]) / 2.0
    };
    0.6052697 * median
}

/// Choose `(scale, zero)` for a tile from its noise; `None` when the tile
/// cannot be quantized.
fn noise_scaling(samples: &[f64], q: f32, method: Quantization) -> Option<(f64, f64)> {
    if q <= 0.0 {
        return None;
    }
    let mut has_nulls = false;
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &x in samples {
        if x.is_nan() {
            has_nulls = true;
        } else {
            min = min.min(x);
            max = max.max(x);
        }
    }
    if min > max {
        // Every sample is null.
        min = 0.0;
        max = 1.0;
    }
    if !min.is_finite() || !max.is_finite() {
        return None;
    }

    let delta = estimate_noise(samples) / f64::from(q);
    let span = (max - min) / delta;
    if delta == 0.0 || span > 2.0 * 2147483647.0 - N_RESERVED_VALUES {
        return None;
    }
    let zero = if has_nulls || method == Quantization::SubtractiveDither2 {
        // Map the minimum to the lowest unreserved integer.
        min - delta * (f64::from(NULL_VALUE) + N_RESERVED_VALUES)
    } else if span < 2147483647.0 - N_RESERVED_VALUES {
        ((min / delta + 0.5) as i64) as f64 * delta
    } else {
        (min + max) / 2.0
    };
    Some((delta, zero))
}

impl Quantizer {
    /// Quantize one tile; `None` means it must be stored losslessly.
    pub fn quantize(&self, samples: &[f64], tile_index: usize) -> Option<QuantizedTile> {
        let (scale, zero) = match self.level {
            QuantizeLevel::Noise(q) => noise_scaling(samples, q, self.method)?,
            QuantizeLevel::Fixed { scale, zero } => {
                if scale <= 0.0 || !scale.is_finite() || !zero.is_finite() {
                    return None;
                }
                (scale, zero)
            }
        };

        let mut dither = self.method.dithered().then(|| Dither::new(tile_index, self.dither_seed));
        let mut values = Vec::with_capacity(samples.len());
        for &x in samples {
            let q = if x.is_nan() {
                self.blank
            } else if self.method == Quantization::SubtractiveDither2 && x == 0.0 {
                ZERO_VALUE
            } else {
                let offset = dither.as_ref().map_or(0.0, |d| d.current() - 0.5);
                let v = nint((x - zero) / scale + offset);
                if v <= f64::from(ZERO_VALUE) || v > f64::from(i32::MAX) || v == f64::from(self.blank) {
                    return None;
                }
                v as i32
            };
            values.push(q);
            if let Some(d) = dither.as_mut() {
                d.advance();
            }
        }
        Some(QuantizedTile { values, scale, zero })
    }

    /// Restore the samples of a quantized tile.
    pub fn dequantize(&self, values: &[i32], scale: f64, zero: f64, tile_index: usize) -> Vec<f64> {
        let mut dither = self.method.dithered().then(|| Dither::new(tile_index, self.dither_seed));
        values
            .iter()
            .map(|&q| {
                let x = if q == self.blank {
                    f64::NAN
                } else if self.method == Quantization::SubtractiveDither2 && q == ZERO_VALUE {
                    0.0
                } else {
                    let offset = dither.as_ref().map_or(0.0, |d| d.current() - 0.5);
                    (f64::from(q) - offset) * scale + zero
                };
                if let Some(d) = dither.as_mut() {
                    d.advance();
                }
                x
            })
            .collect()
    }
}
