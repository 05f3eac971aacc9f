//! HCOMPRESS_1: H-transform followed by quadtree coding of bit planes.
//!
//! The tile is treated as an `nx` x `ny` matrix where `ny` is the length of
//! the fastest axis and `nx` the product of the remaining axes. All
//! arithmetic is done in 64 bits. `SCALE` 0 or 1 is lossless; larger values
//! divide the transform coefficients before coding.
//!
//! Stream layout: magic `DD 99`, `nx`, `ny`, `scale` (big-endian i32), the
//! coefficient sum (big-endian i64), three bit-plane counts, the quadtree
//! bits of the four quadrants ending in a zero nybble, then one sign bit per
//! non-zero coefficient starting on a byte boundary.

use super::bits::{BitReader, BitWriter};
use super::TileCodec;
use crate::array::{ElementType, ImageData};
use crate::endian::{read_i32_be, read_i64_be};
use crate::error::{Error, Result};

const MAGIC: [u8; 2] = [0xDD, 0x99];
const HEADER_LEN: usize = 2 + 4 + 4 + 4 + 8 + 3;

/// Huffman codes for the 16 quadtree nybble values, and their lengths.
const CODE: [u32; 16] = [
    0x3e, 0x00, 0x01, 0x08, 0x02, 0x09, 0x1a, 0x1b, 0x03, 0x1c, 0x0a, 0x1d, 0x0b, 0x1e, 0x3f, 0x0c,
];
const NCODE: [u32; 16] = [6, 3, 3, 4, 3, 4, 5, 5, 3, 5, 4, 5, 4, 5, 6, 4];

/// `ceil(log2(n))`, and 0 for `n <= 1`.
fn log2n(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

// ── H-transform ──

/// Move odd-indexed elements (stride `n2`) behind the even ones.
fn shuffle(a: &mut [i64], start: usize, n: usize, n2: usize, tmp: &mut [i64]) {
    let mut t = 0;
    for i in (1..n).step_by(2) {
        tmp[t] = a[start + i * n2];
        t += 1;
    }
    let mut p1 = start + n2;
    for i in (2..n).step_by(2) {
        a[p1] = a[start + i * n2];
        p1 += n2;
    }
    for &v in &tmp[..t] {
        a[p1] = v;
        p1 += n2;
    }
}

/// Inverse of [`shuffle`].
fn unshuffle(a: &mut [i64], start: usize, n: usize, n2: usize, tmp: &mut [i64]) {
    let nhalf = (n + 1) >> 1;
    for (t, i) in (nhalf..n).enumerate() {
        tmp[t] = a[start + i * n2];
    }
    for i in (0..nhalf).rev() {
        a[start + 2 * i * n2] = a[start + i * n2];
    }
    for (t, i) in (1..n).step_by(2).enumerate() {
        a[start + i * n2] = tmp[t];
    }
}

fn htrans(a: &mut [i64], nx: usize, ny: usize) {
    let nmax = nx.max(ny);
    let levels = log2n(nmax);
    let mut tmp = vec![0i64; (nmax + 1) / 2];

    let mut shift = 0u32;
    let mut mask: i64 = -2;
    let mut mask2 = mask << 1;
    let mut prnd: i64 = 1;
    let mut prnd2 = prnd << 1;
    let mut nrnd2 = prnd2 - 1;
    let round1 = |h: i64, prnd: i64, mask: i64| (if h >= 0 { h + prnd } else { h }) & mask;

    let mut nxtop = nx;
    let mut nytop = ny;
    for _ in 0..levels {
        let oddx = nxtop % 2;
        let oddy = nytop % 2;
        let round0 = |h: i64| (if h >= 0 { h + prnd2 } else { h + nrnd2 }) & mask2;

        let mut i = 0;
        while i < nxtop - oddx {
            let mut s00 = i * ny;
            let mut s10 = s00 + ny;
            let mut j = 0;
            while j < nytop - oddy {
                let h0 = (a[s10 + 1] + a[s10] + a[s00 + 1] + a[s00]) >> shift;
                let hx = (a[s10 + 1] + a[s10] - a[s00 + 1] - a[s00]) >> shift;
                let hy = (a[s10 + 1] - a[s10] + a[s00 + 1] - a[s00]) >> shift;
                let hc = (a[s10 + 1] - a[s10] - a[s00 + 1] + a[s00]) >> shift;
                a[s10 + 1] = hc;
                a[s10] = round1(hx, prnd, mask);
                a[s00 + 1] = round1(hy, prnd, mask);
                a[s00] = round0(h0);
                s00 += 2;
                s10 += 2;
                j += 2;
            }
            if oddy == 1 {
                let h0 = (a[s10] + a[s00]) << (1 - shift);
                let hx = (a[s10] - a[s00]) << (1 - shift);
                a[s10] = round1(hx, prnd, mask);
                a[s00] = round0(h0);
            }
            i += 2;
        }
        if oddx == 1 {
            let mut s00 = i * ny;
            let mut j = 0;
            while j < nytop - oddy {
                let h0 = (a[s00 + 1] + a[s00]) << (1 - shift);
                let hy = (a[s00 + 1] - a[s00]) << (1 - shift);
                a[s00 + 1] = round1(hy, prnd, mask);
                a[s00] = round0(h0);
                s00 += 2;
                j += 2;
            }
            if oddy == 1 {
                let h0 = a[s00] << (2 - shift);
                a[s00] = round0(h0);
            }
        }

        for i in 0..nxtop {
            shuffle(a, ny * i, nytop, 1, &mut tmp);
        }
        for j in 0..nytop {
            shuffle(a, j, nxtop, ny, &mut tmp);
        }

        nxtop = (nxtop + 1) >> 1;
        nytop = (nytop + 1) >> 1;
        shift = 1;
        mask = mask2;
        prnd = prnd2;
        mask2 <<= 1;
        prnd2 <<= 1;
        nrnd2 = prnd2 - 1;
    }
}

fn hinv(a: &mut [i64], nx: usize, ny: usize) {
    let nmax = nx.max(ny);
    let levels = log2n(nmax);
    if levels == 0 {
        return;
    }
    let mut tmp = vec![0i64; (nmax + 1) / 2];

    let mut shift = 1u32;
    let mut bit0: i64 = 1 << (levels - 1);
    let mut bit1 = bit0 << 1;
    let bit2 = bit0 << 2;
    let mut mask0 = -bit0;
    let mut mask1 = mask0 << 1;
    let mask2 = mask0 << 2;
    let mut prnd0 = bit0 >> 1;
    let mut prnd1 = bit1 >> 1;
    let prnd2 = bit2 >> 1;
    let mut nrnd0 = prnd0 - 1;
    let mut nrnd1 = prnd1 - 1;
    let nrnd2 = prnd2 - 1;

    a[0] = (a[0] + if a[0] >= 0 { prnd2 } else { nrnd2 }) & mask2;

    let mut nxtop = 1usize;
    let mut nytop = 1usize;
    let mut nxf = nx;
    let mut nyf = ny;
    let mut c = 1usize << levels;
    for k in (0..levels).rev() {
        c >>= 1;
        nxtop <<= 1;
        nytop <<= 1;
        if nxf <= c {
            nxtop -= 1;
        } else {
            nxf -= c;
        }
        if nyf <= c {
            nytop -= 1;
        } else {
            nyf -= c;
        }
        if k == 0 {
            nrnd0 = 0;
            shift = 2;
        }

        for i in 0..nxtop {
            unshuffle(a, ny * i, nytop, 1, &mut tmp);
        }
        for j in 0..nytop {
            unshuffle(a, j, nxtop, ny, &mut tmp);
        }

        let round1 = |h: i64| (h + if h >= 0 { prnd1 } else { nrnd1 }) & mask1;
        let oddx = nxtop % 2;
        let oddy = nytop % 2;
        let mut i = 0;
        while i < nxtop - oddx {
            let mut s00 = ny * i;
            let mut s10 = s00 + ny;
            let mut j = 0;
            while j < nytop - oddy {
                let mut h0 = a[s00];
                let mut hx = round1(a[s10]);
                let mut hy = round1(a[s00 + 1]);
                let hc = (a[s10 + 1] + if a[s10 + 1] >= 0 { prnd0 } else { nrnd0 }) & mask0;

                // Propagate bit0 of hc to hx and hy, then bits 0 and 1 to h0.
                let lowbit0 = hc & bit0;
                hx = if hx >= 0 { hx - lowbit0 } else { hx + lowbit0 };
                hy = if hy >= 0 { hy - lowbit0 } else { hy + lowbit0 };
                let lowbit1 = (hc ^ hx ^ hy) & bit1;
                h0 = if h0 >= 0 {
                    h0 + lowbit0 - lowbit1
                } else if lowbit0 == 0 {
                    h0 + lowbit1
                } else {
                    h0 + (lowbit0 - lowbit1)
                };

                a[s10 + 1] = (h0 + hx + hy + hc) >> shift;
                a[s10] = (h0 + hx - hy - hc) >> shift;
                a[s00 + 1] = (h0 - hx + hy - hc) >> shift;
                a[s00] = (h0 - hx - hy + hc) >> shift;
                s00 += 2;
                s10 += 2;
                j += 2;
            }
            if oddy == 1 {
                let hx = round1(a[s10]);
                let lowbit1 = hx & bit1;
                let h0 = if a[s00] >= 0 { a[s00] - lowbit1 } else { a[s00] + lowbit1 };
                a[s10] = (h0 + hx) >> shift;
                a[s00] = (h0 - hx) >> shift;
            }
            i += 2;
        }
        if oddx == 1 {
            let mut s00 = ny * i;
            let mut j = 0;
            while j < nytop - oddy {
                let hy = round1(a[s00 + 1]);
                let lowbit1 = hy & bit1;
                let h0 = if a[s00] >= 0 { a[s00] - lowbit1 } else { a[s00] + lowbit1 };
                a[s00 + 1] = (h0 + hy) >> shift;
                a[s00] = (h0 - hy) >> shift;
                s00 += 2;
                j += 2;
            }
            if oddy == 1 {
                a[s00] >>= shift;
            }
        }

        bit1 = bit0;
        bit0 >>= 1;
        mask1 = mask0;
        mask0 >>= 1;
        prnd1 = prnd0;
        prnd0 >>= 1;
        nrnd1 = nrnd0;
        nrnd0 = prnd0 - 1;
    }
}

fn digitize(a: &mut [i64], scale: i32) {
    if scale <= 1 {
        return;
    }
    let scale = i64::from(scale);
    let d = (scale + 1) / 2 - 1;
    for v in a.iter_mut() {
        *v = if *v > 0 { (*v + d) / scale } else { (*v - d) / scale };
    }
}

fn undigitize(a: &mut [i64], scale: i32) {
    if scale <= 1 {
        return;
    }
    for v in a.iter_mut() {
        *v *= i64::from(scale);
    }
}

// ── Quadtree encoding ──

/// Pack bit `bit` of each 2x2 block of the quadrant at `base` (row stride
/// `n`, `nx` rows of `ny`) into one nybble per block.
fn qtree_onebit(a: &[i64], base: usize, n: usize, nx: usize, ny: usize, b: &mut [u8], bit: u32) {
    let at = |idx: usize| ((a[idx] >> bit) & 1) as u8;
    let mut k = 0;
    let mut i = 0;
    while i + 1 < nx {
        let mut s00 = base + n * i;
        let mut s10 = s00 + n;
        let mut j = 0;
        while j + 1 < ny {
            b[k] = at(s10 + 1) | (at(s10) << 1) | (at(s00 + 1) << 2) | (at(s00) << 3);
            k += 1;
            s00 += 2;
            s10 += 2;
            j += 2;
        }
        if j < ny {
            b[k] = (at(s10) << 1) | (at(s00) << 3);
            k += 1;
        }
        i += 2;
    }
    if i < nx {
        let mut s00 = base + n * i;
        let mut j = 0;
        while j + 1 < ny {
            b[k] = (at(s00 + 1) << 2) | (at(s00) << 3);
            k += 1;
            s00 += 2;
            j += 2;
        }
        if j < ny {
            b[k] = at(s00) << 3;
        }
    }
}

/// Reduce an `nx` x `ny` nybble array (row stride `n`) in place: each 2x2
/// block becomes one nybble of non-zero flags.
fn qtree_reduce(a: &mut [u8], n: usize, nx: usize, ny: usize) {
    let nz = |v: u8| u8::from(v != 0);
    let mut k = 0;
    let mut i = 0;
    while i + 1 < nx {
        let mut s00 = n * i;
        let mut s10 = s00 + n;
        let mut j = 0;
        while j + 1 < ny {
            a[k] = nz(a[s10 + 1]) | (nz(a[s10]) << 1) | (nz(a[s00 + 1]) << 2) | (nz(a[s00]) << 3);
            k += 1;
            s00 += 2;
            s10 += 2;
            j += 2;
        }
        if j < ny {
            a[k] = (nz(a[s10]) << 1) | (nz(a[s00]) << 3);
            k += 1;
        }
        i += 2;
    }
    if i < nx {
        let mut s00 = n * i;
        let mut j = 0;
        while j + 1 < ny {
            a[k] = (nz(a[s00 + 1]) << 2) | (nz(a[s00]) << 3);
            k += 1;
            s00 += 2;
            j += 2;
        }
        if j < ny {
            a[k] = nz(a[s00]) << 3;
        }
    }
}

/// Huffman codes gathered least significant bit first, written out in
/// reverse once a bit plane is complete.
struct CodeBuffer {
    bytes: Vec<u8>,
    bitbuffer: u32,
    bits: u32,
    bmax: usize,
}

impl CodeBuffer {
    fn new(bmax: usize) -> Self {
        CodeBuffer {
            bytes: Vec::with_capacity(bmax),
            bitbuffer: 0,
            bits: 0,
            bmax,
        }
    }

    fn reset(&mut self) {
        self.bytes.clear();
        self.bitbuffer = 0;
        self.bits = 0;
    }

    /// Append codes for the non-zero nybbles; `false` once the buffer is
    /// full, meaning the quadtree would expand the data.
    fn copy(&mut self, nybbles: &[u8]) -> bool {
        for &v in nybbles {
            if v != 0 {
                self.bitbuffer |= CODE[v as usize] << self.bits;
                self.bits += NCODE[v as usize];
                if self.bits >= 8 {
                    self.bytes.push((self.bitbuffer & 0xFF) as u8);
                    if self.bytes.len() >= self.bmax {
                        return false;
                    }
                    self.bitbuffer >>= 8;
                    self.bits -= 8;
                }
            }
        }
        true
    }
}

fn write_bdirect(out: &mut BitWriter, scratch: &[u8]) {
    out.write(0x0, 4);
    for &v in scratch {
        out.write(u32::from(v), 4);
    }
}

#[allow(clippy::too_many_arguments)]
fn qtree_encode(out: &mut BitWriter, a: &[i64], base: usize, n: usize, nqx: usize, nqy: usize, nbitplanes: u8) {
    let levels = log2n(nqx.max(nqy));
    let nqx2 = (nqx + 1) / 2;
    let nqy2 = (nqy + 1) / 2;
    let mut scratch = vec![0u8; nqx2 * nqy2];
    let mut buffer = CodeBuffer::new((nqx2 * nqy2 + 1) / 2);

    'planes: for bit in (0..u32::from(nbitplanes)).rev() {
        buffer.reset();
        qtree_onebit(a, base, n, nqx, nqy, &mut scratch, bit);
        let mut nx = (nqx + 1) >> 1;
        let mut ny = (nqy + 1) >> 1;
        if !buffer.copy(&scratch[..nx * ny]) {
            qtree_onebit(a, base, n, nqx, nqy, &mut scratch, bit);
            write_bdirect(out, &scratch);
            continue 'planes;
        }
        for _ in 1..levels {
            qtree_reduce(&mut scratch, ny, nx, ny);
            nx = (nx + 1) >> 1;
            ny = (ny + 1) >> 1;
            if !buffer.copy(&scratch[..nx * ny]) {
                qtree_onebit(a, base, n, nqx, nqy, &mut scratch, bit);
                write_bdirect(out, &scratch);
                continue 'planes;
            }
        }

        out.write(0xF, 4);
        if buffer.bits > 0 {
            out.write(buffer.bitbuffer & ((1 << buffer.bits) - 1), buffer.bits);
        } else if buffer.bytes.is_empty() {
            // No ones in this plane: a lone zero code.
            out.write(CODE[0], NCODE[0]);
        }
        for &byte in buffer.bytes.iter().rev() {
            out.write(u32::from(byte), 8);
        }
    }
}

fn encode(a: &mut [i64], nx: usize, ny: usize, scale: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + a.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(nx as i32).to_be_bytes());
    out.extend_from_slice(&(ny as i32).to_be_bytes());
    out.extend_from_slice(&scale.to_be_bytes());
    out.extend_from_slice(&a[0].to_be_bytes());
    a[0] = 0;

    let mut signs = BitWriter::with_capacity(a.len() / 8 + 1);
    for v in a.iter_mut() {
        if *v > 0 {
            signs.write_bit(false);
        } else if *v < 0 {
            signs.write_bit(true);
            *v = -*v;
        }
    }

    let nx2 = (nx + 1) / 2;
    let ny2 = (ny + 1) / 2;
    let mut vmax = [0i64; 3];
    for i in 0..nx {
        for j in 0..ny {
            let q = usize::from(j >= ny2) + usize::from(i >= nx2);
            vmax[q] = vmax[q].max(a[i * ny + j]);
        }
    }
    let nbitplanes = vmax.map(|v| (64 - v.leading_zeros()) as u8);
    out.extend_from_slice(&nbitplanes);

    let mut bits = BitWriter::with_capacity(a.len());
    qtree_encode(&mut bits, a, 0, ny, nx2, ny2, nbitplanes[0]);
    qtree_encode(&mut bits, a, ny2, ny, nx2, ny / 2, nbitplanes[1]);
    qtree_encode(&mut bits, a, ny * nx2, ny, nx / 2, ny2, nbitplanes[1]);
    qtree_encode(&mut bits, a, ny * nx2 + ny2, ny, nx / 2, ny / 2, nbitplanes[2]);
    bits.write(0, 4);
    out.extend_from_slice(&bits.finish());
    out.extend_from_slice(&signs.finish());
    out
}

// ── Quadtree decoding ──

fn input_huffman(input: &mut BitReader<'_>) -> Result<u8> {
    let mut c = input.read(3)?;
    if c < 4 {
        return Ok(1 << c);
    }
    c = (c << 1) | u32::from(input.read_bit()?);
    match c {
        8 => return Ok(3),
        9 => return Ok(5),
        10 => return Ok(10),
        11 => return Ok(12),
        12 => return Ok(15),
        _ => {}
    }
    c = (c << 1) | u32::from(input.read_bit()?);
    match c {
        26 => return Ok(6),
        27 => return Ok(7),
        28 => return Ok(9),
        29 => return Ok(11),
        30 => return Ok(13),
        _ => {}
    }
    c = (c << 1) | u32::from(input.read_bit()?);
    Ok(if c == 62 { 0 } else { 14 })
}

/// Expand `a` (an `(nx+1)/2` x `(ny+1)/2` nybble array) into `nx` x `ny`
/// one-bit flags, then read a fresh code for every set flag.
fn qtree_expand(input: &mut BitReader<'_>, a: &mut [u8], nx: usize, ny: usize) -> Result<()> {
    let n = ny;
    let nx2 = (nx + 1) / 2;
    let ny2 = (ny + 1) / 2;
    // Spread each value to the top-left corner of its block, from the end
    // so the source is never overwritten first.
    let mut k = nx2 * ny2;
    for i in (0..nx2).rev() {
        for j in (0..ny2).rev() {
            k -= 1;
            a[2 * (n * i + j)] = a[k];
        }
    }

    let mut i = 0;
    while i + 1 < nx {
        let mut s00 = n * i;
        let mut s10 = s00 + n;
        let mut j = 0;
        while j + 1 < ny {
            let v = a[s00];
            a[s10 + 1] = v & 1;
            a[s10] = (v >> 1) & 1;
            a[s00 + 1] = (v >> 2) & 1;
            a[s00] = (v >> 3) & 1;
            s00 += 2;
            s10 += 2;
            j += 2;
        }
        if j < ny {
            let v = a[s00];
            a[s10] = (v >> 1) & 1;
            a[s00] = (v >> 3) & 1;
        }
        i += 2;
    }
    if i < nx {
        let mut s00 = n * i;
        let mut j = 0;
        while j + 1 < ny {
            let v = a[s00];
            a[s00 + 1] = (v >> 2) & 1;
            a[s00] = (v >> 3) & 1;
            s00 += 2;
            j += 2;
        }
        if j < ny {
            a[s00] = (a[s00] >> 3) & 1;
        }
    }

    for v in a[..nx * ny].iter_mut().rev() {
        if *v != 0 {
            *v = input_huffman(input)?;
        }
    }
    Ok(())
}

/// OR bit plane `bit` from the nybble array `a` into the quadrant at `base`.
fn qtree_bitins(a: &[u8], nx: usize, ny: usize, b: &mut [i64], base: usize, n: usize, bit: u32) {
    let plane = 1i64 << bit;
    let mut set = |idx: usize, v: u8, mask: u8| {
        if v & mask != 0 {
            b[idx] |= plane;
        }
    };
    let mut k = 0;
    let mut i = 0;
    while i + 1 < nx {
        let mut s00 = base + n * i;
        let mut j = 0;
        while j + 1 < ny {
            let v = a[k];
            set(s00 + n + 1, v, 1);
            set(s00 + n, v, 2);
            set(s00 + 1, v, 4);
            set(s00, v, 8);
            s00 += 2;
            k += 1;
            j += 2;
        }
        if j < ny {
            let v = a[k];
            set(s00 + n, v, 2);
            set(s00, v, 8);
            k += 1;
        }
        i += 2;
    }
    if i < nx {
        let mut s00 = base + n * i;
        let mut j = 0;
        while j + 1 < ny {
            let v = a[k];
            set(s00 + 1, v, 4);
            set(s00, v, 8);
            s00 += 2;
            k += 1;
            j += 2;
        }
        if j < ny {
            set(s00, a[k], 8);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn qtree_decode(
    input: &mut BitReader<'_>,
    a: &mut [i64],
    base: usize,
    n: usize,
    nqx: usize,
    nqy: usize,
    nbitplanes: u8,
) -> Result<()> {
    let levels = log2n(nqx.max(nqy));
    let nqx2 = (nqx + 1) / 2;
    let nqy2 = (nqy + 1) / 2;
    let mut scratch = vec![0u8; nqx2.max(1) * nqy2.max(1)];

    for bit in (0..u32::from(nbitplanes)).rev() {
        match input.read(4)? {
            0x0 => {
                for v in scratch[..nqx2 * nqy2].iter_mut() {
                    *v = input.read(4)? as u8;
                }
                qtree_bitins(&scratch, nqx, nqy, a, base, n, bit);
            }
            0xF => {
                scratch[0] = input_huffman(input)?;
                let (mut nx, mut ny) = (1usize, 1usize);
                let (mut nfx, mut nfy) = (nqx, nqy);
                let mut c = 1usize << levels;
                for _ in 1..levels {
                    // Walk the sequence n[k-1] = (n[k] + 1) / 2 back up.
                    c >>= 1;
                    nx <<= 1;
                    ny <<= 1;
                    if nfx <= c {
                        nx -= 1;
                    } else {
                        nfx -= c;
                    }
                    if nfy <= c {
                        ny -= 1;
                    } else {
                        nfy -= c;
                    }
                    qtree_expand(input, &mut scratch, nx, ny)?;
                }
                qtree_bitins(&scratch, nqx, nqy, a, base, n, bit);
            }
            _ => return Err(Error::DecompressionError("bad HCOMPRESS bit plane code")),
        }
    }
    Ok(())
}

fn decode(bytes: &[u8], nx: usize, ny: usize) -> Result<(Vec<i64>, i32)> {
    if bytes.len() < HEADER_LEN || bytes[..2] != MAGIC {
        return Err(Error::DecompressionError("bad HCOMPRESS header"));
    }
    let stream_nx = read_i32_be(&bytes[2..]);
    let stream_ny = read_i32_be(&bytes[6..]);
    let scale = read_i32_be(&bytes[10..]);
    if usize::try_from(stream_nx).ok() != Some(nx) || usize::try_from(stream_ny).ok() != Some(ny) {
        return Err(Error::DecompressionError("HCOMPRESS tile shape mismatch"));
    }
    let sumall = read_i64_be(&bytes[14..]);
    let nbitplanes = [bytes[22], bytes[23], bytes[24]];
    if nbitplanes.iter().any(|&p| p > 63) {
        return Err(Error::DecompressionError("bad HCOMPRESS bit plane count"));
    }

    let mut a = vec![0i64; nx * ny];
    let nx2 = (nx + 1) / 2;
    let ny2 = (ny + 1) / 2;
    let mut input = BitReader::new(&bytes[HEADER_LEN..]);
    qtree_decode(&mut input, &mut a, 0, ny, nx2, ny2, nbitplanes[0])?;
    qtree_decode(&mut input, &mut a, ny2, ny, nx2, ny / 2, nbitplanes[1])?;
    qtree_decode(&mut input, &mut a, ny * nx2, ny, nx / 2, ny2, nbitplanes[1])?;
    qtree_decode(&mut input, &mut a, ny * nx2 + ny2, ny, nx / 2, ny / 2, nbitplanes[2])?;
    if input.read(4)? != 0 {
        return Err(Error::DecompressionError("bad HCOMPRESS bit plane values"));
    }

    input.align();
    for v in a.iter_mut() {
        if *v != 0 && input.read_bit()? {
            *v = -*v;
        }
    }
    a[0] = sumall;
    Ok((a, scale))
}

/// `(nx, ny)` for a tile shape: `ny` is the fastest axis.
fn matrix_shape(shape: &[usize]) -> Result<(usize, usize)> {
    let ny = *shape.first().ok_or(Error::InvalidValue)?;
    let nx: usize = shape[1..].iter().product();
    if nx == 0 || ny == 0 || i32::try_from(nx).is_err() || i32::try_from(ny).is_err() {
        return Err(Error::InvalidValue);
    }
    Ok((nx, ny))
}

/// `HCOMPRESS_1` codec for integer tiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct HcompressCodec {
    /// `SCALE` parameter: 0 or 1 is lossless.
    pub scale: i32,
    /// `SMOOTH` parameter, recorded in the header; reconstruction does not
    /// smooth.
    pub smooth: i32,
}

impl TileCodec for HcompressCodec {
    fn compress(&self, data: &ImageData, shape: &[usize]) -> Result<Vec<u8>> {
        let (nx, ny) = matrix_shape(shape)?;
        let mut a = data.to_i64().ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!(
                "HCOMPRESS_1 for BITPIX {}",
                data.element_type().bitpix()
            ))
        })?;
        if a.len() != nx * ny {
            return Err(Error::InvalidValue);
        }
        // Each transform level can double the coefficient magnitude.
        let headroom = 60u32.saturating_sub(log2n(nx.max(ny)));
        let max_abs = a.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
        if max_abs >> headroom != 0 {
            return Err(Error::CompressionError("values too large for HCOMPRESS_1"));
        }
        htrans(&mut a, nx, ny);
        digitize(&mut a, self.scale);
        Ok(encode(&mut a, nx, ny, self.scale))
    }

    fn decompress(&self, bytes: &[u8], element_type: ElementType, shape: &[usize]) -> Result<ImageData> {
        let (nx, ny) = matrix_shape(shape)?;
        let (mut a, scale) = decode(bytes, nx, ny)?;
        undigitize(&mut a, scale);
        hinv(&mut a, nx, ny);
        if scale > 1 {
            // Lossy reconstruction may overshoot the element range.
            let (lo, hi) = match element_type {
                ElementType::U8 => (0, i64::from(u8::MAX)),
                ElementType::I16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
                ElementType::I32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
                _ => (i64::MIN, i64::MAX),
            };
            for v in a.iter_mut() {
                *v = (*v).clamp(lo, hi);
            }
        }
        ImageData::from_i64(element_type, &a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossless(values: Vec<i64>, shape: &[usize]) {
        let data = ImageData::I64(values);
        let codec = HcompressCodec::default();
        let packed = codec.compress(&data, shape).unwrap();
        let back = codec.decompress(&packed, ElementType::I64, shape).unwrap();
        assert_eq!(back, data, "shape {shape:?}");
    }

    #[test]
    fn log2n_rounds_up() {
        assert_eq!(log2n(0), 0);
        assert_eq!(log2n(1), 0);
        assert_eq!(log2n(2), 1);
        assert_eq!(log2n(3), 2);
        assert_eq!(log2n(5), 3);
        assert_eq!(log2n(8), 3);
        assert_eq!(log2n(9), 4);
    }

    #[test]
    fn transform_inverts_2x2() {
        let mut a = vec![1, 2, 3, 4];
        htrans(&mut a, 2, 2);
        assert_eq!(a, vec![12, 2, 4, 0]);
        hinv(&mut a, 2, 2);
        assert_eq!(a, vec![1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_unshuffle() {
        let mut a: Vec<i64> = (0..7).collect();
        let mut tmp = vec![0; 4];
        shuffle(&mut a, 0, 7, 1, &mut tmp);
        assert_eq!(a, vec![0, 2, 4, 6, 1, 3, 5]);
        unshuffle(&mut a, 0, 7, 1, &mut tmp);
        assert_eq!(a, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn huffman_table_decodes() {
        for v in 0..16u8 {
            let mut w = BitWriter::default();
            w.write(CODE[v as usize], NCODE[v as usize]);
            let bytes = w.finish();
            assert_eq!(input_huffman(&mut BitReader::new(&bytes)).unwrap(), v);
        }
    }

    #[test]
    fn lossless_odd_and_even_shapes() {
        let smooth = |i: i64, j: i64| 1000 + 3 * i - 2 * j + (i * j) % 7;
        for (ny, nx) in [(1, 1), (2, 2), (5, 3), (16, 16), (17, 9), (40, 1), (1, 13), (33, 4)] {
            let values: Vec<i64> = (0..nx * ny)
                .map(|k| smooth((k / ny) as i64, (k % ny) as i64))
                .collect();
            lossless(values, &[ny, nx]);
        }
    }

    #[test]
    fn lossless_with_negatives_and_noise() {
        let mut state = 12345u64;
        let values: Vec<i64> = (0..24 * 11)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as i64 % 20001) - 10000
            })
            .collect();
        lossless(values, &[24, 11]);
    }

    #[test]
    fn constant_and_zero_tiles() {
        lossless(vec![0; 64], &[8, 8]);
        lossless(vec![-5; 30], &[10, 3]);
    }

    #[test]
    fn i16_round_trip() {
        let data = ImageData::I16((0..100).map(|i| (i * 300 - 15000) as i16).collect());
        let codec = HcompressCodec::default();
        let packed = codec.compress(&data, &[10, 10]).unwrap();
        assert_eq!(codec.decompress(&packed, ElementType::I16, &[10, 10]).unwrap(), data);
    }

    #[test]
    fn lossy_scale_stays_close() {
        let data = ImageData::I32((0..256).map(|i| 5000 + (i % 16) * 10).collect());
        let codec = HcompressCodec { scale: 4, smooth: 0 };
        let packed = codec.compress(&data, &[16, 16]).unwrap();
        let back = codec.decompress(&packed, ElementType::I32, &[16, 16]).unwrap();
        let (ImageData::I32(orig), ImageData::I32(back)) = (&data, &back) else {
            panic!("type changed");
        };
        for (a, b) in orig.iter().zip(back) {
            assert!((a - b).abs() <= 16, "{a} vs {b}");
        }
    }

    #[test]
    fn shape_mismatch_is_detected() {
        let data = ImageData::I32(vec![1; 12]);
        let packed = HcompressCodec::default().compress(&data, &[4, 3]).unwrap();
        assert!(HcompressCodec::default().decompress(&packed, ElementType::I32, &[3, 4]).is_err());
    }

    #[test]
    fn huge_values_are_rejected() {
        let data = ImageData::I64(vec![i64::MAX, 0, 0, 0]);
        assert!(matches!(
            HcompressCodec::default().compress(&data, &[2, 2]),
            Err(Error::CompressionError(_))
        ));
    }
}
