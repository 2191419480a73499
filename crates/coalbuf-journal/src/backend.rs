//! Seam between the coalescing buffer and the storage backend.
//!
//! The buffer core never performs I/O. On every flush it fills a
//! backend-supplied [`FlushBuffer`] and hands it over together with the
//! completion handles accumulated since the previous flush. The backend owns
//! both from that point on.

use std::fmt;

use coalbuf_error::{JournalError, Result};

/// Owned destination buffer for one flushed batch.
///
/// Capacity and valid length are tracked separately so backends can pool
/// these: a pooled buffer keeps its capacity while [`FlushBuffer::clear`]
/// resets the valid range. The core truncates the valid range to exactly the
/// batch length before handoff.
pub struct FlushBuffer {
    bytes: Box<[u8]>,
    len: usize,
}

impl FlushBuffer {
    /// Allocate a buffer with the given capacity and an empty valid range.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0_u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Length of the valid range.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the valid range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes of the batch.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Reset the valid range, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy `src` into the buffer and set the valid range to its length.
    pub(crate) fn fill_from(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.bytes.len() {
            return Err(JournalError::internal(format!(
                "backend buffer of {} bytes cannot hold a {}-byte batch",
                self.bytes.len(),
                src.len()
            )));
        }
        self.bytes[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }
}

impl fmt::Debug for FlushBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushBuffer")
            .field("len", &self.len)
            .field("capacity", &self.bytes.len())
            .finish()
    }
}

/// Per-record completion handle.
///
/// The buffer core never invokes these; it hands them to the backend on
/// flush, and the backend notifies each handle exactly once when the batch
/// I/O completes or fails.
pub trait IoCompletion: Send {
    /// The record reached storage with whatever durability the backend
    /// provides for the batch.
    fn done(&self);

    /// The batch I/O failed; the record was not persisted.
    fn on_error(&self, code: i32, message: &str);
}

/// The storage backend observed by the coalescing buffer.
///
/// All three methods are invoked with the buffer's monitor held. They must be
/// cheap and non-blocking: `flush_buffer` enqueues the I/O and returns, and
/// implementations must never call back into the buffer synchronously.
pub trait FlushObserver: Send + Sync {
    /// How many more bytes fit in the currently open underlying file.
    fn remaining_bytes(&self) -> usize;

    /// Supply a destination buffer with capacity of at least `min_capacity`.
    ///
    /// `requested_len` is the batch length the caller will fill; pooling
    /// implementations may use it to pick a bucket.
    fn new_buffer(&self, min_capacity: usize, requested_len: usize) -> FlushBuffer {
        FlushBuffer::with_capacity(min_capacity.max(requested_len))
    }

    /// Accept a filled batch for I/O, taking ownership of the completion
    /// handles. Completion or failure is reported through those handles.
    fn flush_buffer(
        &self,
        buffer: FlushBuffer,
        sync_requested: bool,
        callbacks: Vec<Box<dyn IoCompletion>>,
    );
}

/// Encoder for the zero-copy admission path.
///
/// `encode` writes exactly `encoded_len` bytes at the start of `dest`,
/// skipping the staging copy that the slice-based admission path performs.
pub trait RecordEncoder {
    /// Exact number of bytes `encode` will write.
    fn encoded_len(&self) -> usize;

    /// Write the record into `dest`, which is exactly `encoded_len` bytes.
    fn encode(&self, dest: &mut [u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_from_truncates_valid_range_to_source() {
        let mut buffer = FlushBuffer::with_capacity(64);
        buffer
            .fill_from(&[7_u8; 10])
            .expect("source should fit the capacity");
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.as_slice(), &[7_u8; 10]);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 64, "clear should keep the allocation");
    }

    #[test]
    fn fill_from_rejects_oversized_source() {
        let mut buffer = FlushBuffer::with_capacity(8);
        let err = buffer
            .fill_from(&[0_u8; 9])
            .expect_err("an oversized source should be rejected");
        assert!(matches!(err, JournalError::Internal { .. }));
    }
}
