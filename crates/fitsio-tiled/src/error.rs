/// All errors that can occur while compressing or decompressing tiled HDUs.
#[derive(Debug)]
pub enum Error {
    /// Malformed FITS header block.
    InvalidHeader,
    /// Premature end of data while reading.
    UnexpectedEof,
    /// Unrecognized BITPIX (or ZBITPIX) value.
    InvalidBitpix(i64),
    /// Malformed keyword name in a header card.
    InvalidKeyword,
    /// A header value, TFORM, or tiling parameter could not be used.
    InvalidValue,
    /// A required keyword was not found in the header.
    MissingKeyword(String),
    /// The algorithm / quantization / element type combination has no codec.
    UnsupportedAlgorithm(String),
    /// A heap write would push the heap past its capacity.
    HeapTooLarge { requested: u64, limit: u64 },
    /// A single tile failed; `tile` is its zero-based index.
    TileFailed { tile: usize, source: Box<Error> },
    /// Compressed tile bytes could not be decoded.
    DecompressionError(&'static str),
    /// A codec could not represent the tile samples.
    CompressionError(&'static str),
    /// A tile range outside `0..tiles` or with `from > to`.
    InvalidTileRange { from: usize, to: usize, tiles: usize },
    /// An I/O error from the standard library.
    Io(std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap `self` as the failure of tile `tile`.
    pub(crate) fn in_tile(self, tile: usize) -> Error {
        Error::TileFailed {
            tile,
            source: Box::new(self),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidHeader => write!(f, "invalid FITS header"),
            Error::UnexpectedEof => write!(f, "unexpected end of file"),
            Error::InvalidBitpix(v) => write!(f, "invalid BITPIX value: {v}"),
            Error::InvalidKeyword => write!(f, "invalid keyword name"),
            Error::InvalidValue => write!(f, "invalid header value"),
            Error::MissingKeyword(kw) => write!(f, "missing required keyword: {kw}"),
            Error::UnsupportedAlgorithm(what) => write!(f, "unsupported compression: {what}"),
            Error::HeapTooLarge { requested, limit } => write!(
                f,
                "heap too large: {requested} bytes requested, limit is {limit} bytes (use smaller tiles)"
            ),
            Error::TileFailed { tile, source } => write!(f, "tile {tile} failed: {source}"),
            Error::DecompressionError(why) => write!(f, "decompression error: {why}"),
            Error::CompressionError(why) => write!(f, "compression error: {why}"),
            Error::InvalidTileRange { from, to, tiles } => {
                write!(f, "invalid tile range {from}..{to} for {tiles} tiles")
            }
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::TileFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
