//! Tile geometry: partitioning an N-dimensional array into tiles.
//!
//! Axes are in FITS order, so axis 0 varies fastest both inside a tile and
//! when stepping from one tile to the next.

use crate::error::{Error, Result};
use crate::header::Header;

/// A rectangular region: `start[i]..end[i]` along each axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileArea {
    pub start: Vec<usize>,
    pub end: Vec<usize>,
}

impl TileArea {
    pub fn new(start: &[usize], end: &[usize]) -> Self {
        TileArea {
            start: start.to_vec(),
            end: end.to_vec(),
        }
    }

    /// Side lengths of the region.
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.end)
            .map(|(s, e)| e.saturating_sub(*s))
            .collect()
    }

    /// Number of samples in the region.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the two regions share at least one sample.
    ///
    /// Areas of different rank never intersect.
    pub fn intersects(&self, other: &TileArea) -> bool {
        self.start.len() == other.start.len()
            && (0..self.start.len()).all(|i| {
                self.start[i] < other.end[i] && other.start[i] < self.end[i]
            })
    }

    /// Whether `point` lies inside the region.
    pub fn contains(&self, point: &[usize]) -> bool {
        point.len() == self.start.len()
            && point
                .iter()
                .enumerate()
                .all(|(i, &p)| self.start[i] <= p && p < self.end[i])
    }
}

/// Row tiling: the whole first axis, one step along every other axis.
pub fn default_tile_shape(axes: &[usize]) -> Vec<usize> {
    let mut shape = vec![1; axes.len()];
    if let Some(first) = axes.first() {
        shape[0] = *first;
    }
    shape
}

/// Tile shape from `ZTILEn`, defaulting `ZTILE1` to `ZNAXIS1` and the
/// others to 1.
pub fn tile_shape_from_header(header: &Header, axes: &[usize]) -> Result<Vec<usize>> {
    let mut shape = default_tile_shape(axes);
    for (i, len) in shape.iter_mut().enumerate() {
        let key = format!("ZTILE{}", i + 1);
        if let Some(n) = header.int(&key) {
            *len = usize::try_from(n).map_err(|_| Error::InvalidValue)?;
        }
    }
    Ok(shape)
}

/// Number of tiles along each axis.
pub fn tile_grid(axes: &[usize], tile_shape: &[usize]) -> Result<Vec<usize>> {
    if axes.len() != tile_shape.len() || tile_shape.contains(&0) {
        return Err(Error::InvalidValue);
    }
    Ok(axes
        .iter()
        .zip(tile_shape)
        .map(|(&a, &t)| a.div_ceil(t))
        .collect())
}

/// Partition the array into tiles, first axis fastest.
///
/// The last tile along an axis is clamped to the remaining extent. A tile
/// length at or beyond the axis length gives a single tile on that axis.
pub fn plan_tiles(axes: &[usize], tile_shape: &[usize]) -> Result<Vec<TileArea>> {
    let grid = tile_grid(axes, tile_shape)?;
    if axes.is_empty() || grid.contains(&0) {
        return Ok(Vec::new());
    }

    let count: usize = grid.iter().product();
    let mut tiles = Vec::with_capacity(count);
    let mut index = vec![0usize; axes.len()];
    for _ in 0..count {
        let start: Vec<usize> = index.iter().zip(tile_shape).map(|(i, t)| i * t).collect();
        let end: Vec<usize> = start
            .iter()
            .zip(tile_shape)
            .zip(axes)
            .map(|((s, t), a)| (s + t).min(*a))
            .collect();
        tiles.push(TileArea { start, end });

        for (axis, idx) in index.iter_mut().enumerate() {
            *idx += 1;
            if *idx < grid[axis] {
                break;
            }
            *idx = 0;
        }
    }
    Ok(tiles)
}

/// Offsets (into the full array) of each contiguous first-axis run of
/// `area`, in tile order.
fn runs(area: &TileArea, axes: &[usize]) -> impl Iterator<Item = usize> {
    let shape = area.shape();
    let outer: usize = shape.iter().skip(1).product();
    let area = area.clone();
    let axes = axes.to_vec();
    (0..outer).map(move |mut k| {
        let mut offset = area.start[0];
        let mut stride = axes[0];
        for axis in 1..axes.len() {
            let coord = area.start[axis] + k % shape[axis];
            k /= shape[axis];
            offset += coord * stride;
            stride *= axes[axis];
        }
        offset
    })
}

/// Copy the samples of `area` out of a full array, in tile order.
pub fn gather<T: Copy>(area: &TileArea, axes: &[usize], src: &[T]) -> Vec<T> {
    let width = area.end[0] - area.start[0];
    let mut out = Vec::with_capacity(area.len());
    if width == 0 {
        return out;
    }
    for offset in runs(area, axes) {
        out.extend_from_slice(&src[offset..offset + width]);
    }
    out
}

/// Write tile-ordered samples back into their place in a full array.
pub fn scatter<T: Copy>(area: &TileArea, axes: &[usize], tile: &[T], dst: &mut [T]) {
    let width = area.end[0] - area.start[0];
    if width == 0 {
        return;
    }
    for (chunk, offset) in tile.chunks_exact(width).zip(runs(area, axes)) {
        dst[offset..offset + width].copy_from_slice(chunk);
    }
}

/// Human-readable `[a:b, c:d]` form used in log messages.
pub fn describe(area: &TileArea) -> String {
    let parts: Vec<String> = area
        .start
        .iter()
        .zip(&area.end)
        .map(|(s, e)| format!("{s}:{e}"))
        .collect();
    format!("[{}]", parts.join(", "))
}
