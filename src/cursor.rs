// Bounds-checked forward cursor over a slice.
//
// Shared by the byte-level wire readers: links, manifests, references,
// top keys, blobs and patches.

use crate::digest::{DIGEST_LEN, LinkDigest};
use crate::error::{Error, Result};
use crate::varint;

/// A slice plus a read position.
#[derive(Debug, Clone, Copy)]
pub struct SliceCursor<'a, T> {
    data: &'a [T],
    pos: usize,
}

impl<'a, T> SliceCursor<'a, T> {
    pub fn new(data: &'a [T]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [T] {
        &self.data[self.pos..]
    }

    /// Consume `n` elements.
    pub fn take(&mut self, n: usize) -> Result<&'a [T]> {
        if n > self.remaining() {
            return Err(Error::corrupt(format!(
                "truncated input: wanted {n} at offset {}, {} remaining",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Element at `pos + offset` without consuming it.
    pub fn peek(&self, offset: usize) -> Option<&'a T> {
        self.data.get(self.pos + offset)
    }
}

// ---------------------------------------------------------------------------
// Big-endian byte readers
// ---------------------------------------------------------------------------

impl<'a> SliceCursor<'a, u8> {
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn read_digest(&mut self) -> Result<LinkDigest> {
        Ok(LinkDigest::from_bytes(self.array::<DIGEST_LEN>()?))
    }

    pub fn read_varint(&mut self) -> Result<usize> {
        let (val, len) = varint::read_usize(self.rest())?;
        self.pos += len;
        Ok(val)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
}
