//! Fixed-capacity output buffer for rewritten method bodies.
//!
//! The buffer is sized once, before emission starts, and never grows. Every write checks the
//! remaining room first and either lands completely or not at all, so a body that does not fit
//! fails with [`crate::Error::BufferOverflow`] and nothing half-written can escape.

use crate::{Error, Result};

/// Pre-sized byte buffer with a write cursor.
#[derive(Debug)]
pub struct RewriteBuffer {
    data: Vec<u8>,
    position: usize,
}

impl RewriteBuffer {
    /// Allocate a zeroed buffer holding at most `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        RewriteBuffer {
            data: vec![0; capacity],
            position: 0,
        }
    }

    /// Total number of bytes the buffer can hold
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes that can still be written
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Claim `needed` bytes at the cursor, returning the start offset of the claimed range.
    fn claim(&mut self, needed: usize) -> Result<usize> {
        if needed > self.remaining() {
            return Err(Error::BufferOverflow {
                needed,
                offset: self.position,
                capacity: self.data.len(),
            });
        }

        let start = self.position;
        self.position += needed;
        Ok(start)
    }

    /// Append `bytes` as a single unit.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if `bytes` does not fit; the buffer is unchanged.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.claim(bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Append a single byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the buffer is full.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Append a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the value does not fit.
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the value does not fit.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append `count` zero bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if they do not fit.
    pub fn write_zeros(&mut self, count: usize) -> Result<()> {
        let start = self.claim(count)?;
        self.data[start..start + count].fill(0);
        Ok(())
    }

    /// Pad with zeros until the cursor is a multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BufferOverflow`] if the padding does not fit.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - self.position % alignment) % alignment;
        self.write_zeros(padding)
    }

    /// Overwrite already written bytes at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range reaches past the cursor.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset.checked_add(bytes.len()).ok_or(Error::OutOfBounds)?;
        if end > self.position {
            return Err(Error::OutOfBounds);
        }

        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// The bytes written so far
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.position]
    }

    /// Consume the buffer, returning only the written bytes.
    #[must_use]
    pub fn into_inner(mut self) -> Vec<u8> {
        self.data.truncate(self.position);
        self.data
    }
}
