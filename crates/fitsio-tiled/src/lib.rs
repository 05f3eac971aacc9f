//! Tiled compression of FITS images and binary tables.
//!
//! An image (or table) is cut into tiles, every tile is compressed on its
//! own, and the compressed tiles are stored as variable-length cells of a
//! binary table. See [`image::compress_image`] and
//! [`compressed_table::compress_table`] for the entry points.

pub mod array;
pub mod block;
pub mod codec;
pub mod compressed_table;
pub mod endian;
pub mod error;
pub mod geometry;
pub mod hdu;
pub mod header;
pub mod heap;
pub mod image;
pub mod keywords;
pub mod mask;
pub mod pool;
pub mod table;
pub mod tile;
pub mod value;

pub use array::{ElementType, ImageData};
pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use codec::{Algorithm, CodecParams, QuantizeLevel, Quantization};
pub use error::{Error, Result};
pub use geometry::TileArea;
pub use hdu::CompressedHdu;
pub use header::{Card, Header};
pub use image::CompressionConfig;
pub use pool::TilePool;
pub use table::BinaryTable;
pub use tile::TileEncoding;
pub use value::Value;
