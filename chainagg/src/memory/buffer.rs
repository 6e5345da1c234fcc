//! Growable byte buffer with a logical write position and a global offset.

use crate::error::{ChainError, Result};

/// A byte container for one rank's serialized contribution.
///
/// - `size()` is the allocated, addressable length (`data().len()`).
/// - `position()` counts the valid bytes, always `<= size()`.
/// - `absolute_position()` is where this buffer's bytes begin in the merged
///   output stream, filled in by the global offset exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    position: usize,
    absolute_position: u64,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty buffer with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Buffer holding `bytes`, fully written.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            position: bytes.len(),
            absolute_position: 0,
        }
    }

    /// Allocated length in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of valid (written) bytes.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Offset of this buffer within the merged output stream.
    pub fn absolute_position(&self) -> u64 {
        self.absolute_position
    }

    pub fn set_absolute_position(&mut self, absolute_position: u64) {
        self.absolute_position = absolute_position;
    }

    /// Bytes allocated past the write position.
    pub fn available(&self) -> usize {
        self.data.len() - self.position
    }

    /// The valid bytes, `0..position`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.position]
    }

    /// The whole allocated region.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Append `bytes` at the write position, growing if needed.
    pub fn write(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    /// Grow to `new_size` bytes, preserving every existing byte.
    ///
    /// Requests below the current size fail: this path never drops data.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size < self.data.len() {
            return Err(ChainError::BufferShrink {
                current: self.data.len(),
                requested: new_size,
            });
        }
        self.data.resize(new_size, 0);
        Ok(())
    }

    /// Grow to at least `new_size` bytes and mark the whole buffer written
    /// (`position = size()`).
    pub fn resize_update(&mut self, new_size: usize) -> Result<()> {
        if new_size > self.data.len() {
            self.resize(new_size)?;
        }
        self.position = self.data.len();
        Ok(())
    }

    /// Turn this buffer into a fresh receive slot of exactly `len` bytes.
    ///
    /// Previous contents are discarded; the absolute position is kept.
    pub fn prepare_receive(&mut self, len: usize) -> Result<()> {
        self.data.clear();
        self.position = 0;
        self.resize_update(len)
    }

    /// Take ownership of `data` as the buffer contents, fully written.
    ///
    /// The absolute position is kept.
    pub fn replace_data(&mut self, data: Vec<u8>) {
        self.position = data.len();
        self.data = data;
    }

    /// Rewind the write position to 0.
    ///
    /// `reset_absolute` also zeroes the absolute position; `zero_fill`
    /// overwrites the allocated bytes with zeros.
    pub fn reset(&mut self, reset_absolute: bool, zero_fill: bool) {
        self.position = 0;
        if reset_absolute {
            self.absolute_position = 0;
        }
        if zero_fill {
            self.data.fill(0);
        }
    }
}
