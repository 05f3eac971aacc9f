//! The binary-table heap: variable-length cell payloads stored after the
//! fixed-width rows.

use crate::error::{Error, Result};

/// Largest heap this crate will build, in bytes (2 GiB).
pub const MAX_HEAP_SIZE: u64 = 1 << 31;

/// Location of one variable-length cell in the heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapDescriptor {
    /// Number of bytes in the cell.
    pub len: u64,
    /// Byte offset from the start of the heap.
    pub offset: u64,
}

impl HeapDescriptor {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Check that `additional` more bytes fit on a heap of `size` bytes.
pub fn check_capacity(size: u64, additional: u64, limit: u64) -> Result<()> {
    let requested = size.saturating_add(additional);
    if requested > limit {
        return Err(Error::HeapTooLarge { requested, limit });
    }
    Ok(())
}

/// Append-only heap with a hard capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Heap {
    data: Vec<u8>,
    limit: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    /// An empty heap limited to [`MAX_HEAP_SIZE`].
    pub fn new() -> Self {
        Heap::with_limit(MAX_HEAP_SIZE)
    }

    /// An empty heap with a custom capacity (at most [`MAX_HEAP_SIZE`]).
    pub fn with_limit(limit: u64) -> Self {
        Heap {
            data: Vec::new(),
            limit: limit.min(MAX_HEAP_SIZE),
        }
    }

    /// Wrap heap bytes read from a file.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Heap {
            data,
            limit: MAX_HEAP_SIZE,
        }
    }

    /// Append `bytes` and return where they landed.
    ///
    /// Empty cells get the descriptor `(0, 0)` and leave the heap unchanged.
    pub fn put(&mut self, bytes: &[u8]) -> Result<HeapDescriptor> {
        if bytes.is_empty() {
            return Ok(HeapDescriptor::default());
        }
        check_capacity(self.size(), bytes.len() as u64, self.limit)?;
        let offset = self.size();
        self.data.extend_from_slice(bytes);
        Ok(HeapDescriptor {
            len: bytes.len() as u64,
            offset,
        })
    }

    /// Read back a stored span.
    pub fn get(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let start = usize::try_from(offset).map_err(|_| Error::UnexpectedEof)?;
        let len = usize::try_from(len).map_err(|_| Error::UnexpectedEof)?;
        let end = start.checked_add(len).ok_or(Error::UnexpectedEof)?;
        self.data.get(start..end).ok_or(Error::UnexpectedEof)
    }

    /// Read the span a descriptor points at.
    pub fn cell(&self, desc: HeapDescriptor) -> Result<&[u8]> {
        self.get(desc.offset, desc.len)
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
