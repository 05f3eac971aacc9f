/// FITS block size in bytes (each logical record is one block).
pub const BLOCK_SIZE: usize = 2880;

/// FITS card (keyword record) size in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards that fit in a single block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Padding byte used for header blocks (ASCII space).
pub const HEADER_PAD_BYTE: u8 = 0x20;

/// Padding byte used for data blocks (zero).
pub const DATA_PAD_BYTE: u8 = 0x00;

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    num_bytes.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Extend `buf` with `pad_byte` up to the next block boundary.
///
/// Only the bytes written since `start` count towards the block, so a header
/// and its data unit can live in the same buffer.
pub fn pad_to_block(buf: &mut Vec<u8>, start: usize, pad_byte: u8) {
    let used = buf.len() - start;
    buf.resize(start + padded_byte_len(used), pad_byte);
}
