//! # Response Body Buffer
//!
//! Accumulates a streamed upstream body. Capacity grows geometrically so that
//! appending many small chunks costs amortized O(1) per byte. Sealing freezes the
//! buffer into [`Bytes`], which can be cloned cheaply and read by any number of
//! concurrent replays.

use bytes::{Bytes, BytesMut};

/// Capacity allocated on the first append when no size hint was given
const INITIAL_CAPACITY: usize = 4 * 1024;

/// Upper bound on capacity reserved up front from a declared Content-Length
const MAX_PREALLOCATION: usize = 8 * 1024 * 1024;

/// Append-only byte buffer owned by the task fetching an entry
#[derive(Debug, Default)]
pub struct BodyBuffer {
    buf: BytesMut,
}

impl BodyBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer sized for a declared body length
    pub fn with_size_hint(hint: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(hint.min(MAX_PREALLOCATION)),
        }
    }

    /// Append a chunk, at least doubling capacity whenever it runs out
    pub fn append(&mut self, chunk: &[u8]) {
        let needed = self.buf.len() + chunk.len();
        if needed > self.buf.capacity() {
            let target = needed
                .max(self.buf.capacity().saturating_mul(2))
                .max(INITIAL_CAPACITY);
            self.buf.reserve(target - self.buf.len());
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Currently allocated capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Freeze the buffer; the returned bytes are read-only from here on
    pub fn seal(self) -> Bytes {
        self.buf.freeze()
    }
}
