//! A no_std byte-slice cursor used to walk the partition table.
//!
//! [`SliceReader`] wraps a byte slice and hands out sub-slices with position
//! tracking, a small stand-in for `std::io::Cursor` that works without the
//! standard library.

use byteorder_lite::{ByteOrder, LittleEndian};

use crate::decoder::DecodeError;

/// A reader that wraps a byte slice and tracks the current position.
#[derive(Clone, Debug)]
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// Create a new reader over the given byte slice.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes remaining from the current position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Slice of all remaining bytes, consuming them.
    #[inline]
    pub fn take_remaining(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    /// Take a slice of `n` bytes from the current position and advance.
    #[inline]
    pub fn take_slice(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::TruncatedBitstream);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Like [`take_slice`](Self::take_slice) but clamped to what is left.
    #[inline]
    pub fn take_up_to(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    /// Read a u24 in little-endian byte order (as u32).
    #[inline]
    pub fn read_u24_le(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take_slice(3)?;
        Ok(LittleEndian::read_u24(bytes))
    }
}
