//! Per-connection message buffer.
//!
//! Each connection owns exactly one `ChatMessage`, allocated when the
//! connection is accepted and reused for every read/write cycle until the
//! connection closes. The buffer never grows: a single read is bounded by
//! `MAX_LENGTH`, so larger payloads arrive as several chunks.

use bytes::BytesMut;
use std::borrow::Cow;

/// Maximum number of bytes taken by a single read.
pub const MAX_LENGTH: usize = 1024;

/// Fixed-capacity byte buffer with a count of valid bytes.
///
/// Invariant: `len() <= MAX_LENGTH`.
#[derive(Debug)]
pub struct ChatMessage {
    /// Backing storage, always `MAX_LENGTH` initialized bytes.
    data: BytesMut,
    /// Number of valid bytes at the front of `data`.
    length: usize,
}

impl ChatMessage {
    /// Create an empty message buffer.
    pub fn new() -> Self {
        Self {
            data: BytesMut::zeroed(MAX_LENGTH),
            length: 0,
        }
    }

    /// The whole backing storage, for reading into.
    pub fn read_buf(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Record how many bytes the last read produced.
    ///
    /// # Panics
    /// Panics if `len` exceeds `MAX_LENGTH`.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= MAX_LENGTH, "message length {len} exceeds capacity");
        self.length = len;
    }

    /// The valid bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Valid bytes from `offset` onwards (for resuming partial writes).
    pub fn remaining(&self, offset: usize) -> &[u8] {
        &self.data[offset.min(self.length)..self.length]
    }

    /// Lossy text view, used for logging.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.length
    }

    /// Mark the buffer empty. Storage is kept for the next read.
    pub fn clear(&mut self) {
        self.length = 0;
    }
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self::new()
    }
}
