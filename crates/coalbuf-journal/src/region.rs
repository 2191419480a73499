//! Fixed-capacity staging area for record payloads between flushes.

use coalbuf_error::{JournalError, Result};

use crate::backend::{FlushBuffer, RecordEncoder};

/// The batch region: one allocation made at construction, a write cursor,
/// and nothing else. Admission guarantees records fit before they arrive;
/// an append past the capacity is an invariant violation, not backpressure.
pub(crate) struct BatchRegion {
    bytes: Box<[u8]>,
    pos: usize,
}

impl BatchRegion {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0_u8; capacity].into_boxed_slice(),
            pos: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Current write cursor, equal to the byte count of the pending batch.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Append a pre-encoded payload at the write cursor.
    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<()> {
        let end = self.reserve(payload.len())?;
        self.bytes[self.pos..end].copy_from_slice(payload);
        self.pos = end;
        Ok(())
    }

    /// Append by letting `encoder` write directly at the cursor.
    pub(crate) fn append_with(&mut self, encoder: &dyn RecordEncoder) -> Result<usize> {
        let len = encoder.encoded_len();
        let end = self.reserve(len)?;
        encoder.encode(&mut self.bytes[self.pos..end]);
        self.pos = end;
        Ok(len)
    }

    /// Copy the pending batch into a backend-supplied destination.
    pub(crate) fn copy_into(&self, dest: &mut FlushBuffer) -> Result<()> {
        dest.fill_from(&self.bytes[..self.pos])
    }

    pub(crate) fn reset(&mut self) {
        self.pos = 0;
    }

    fn reserve(&self, len: usize) -> Result<usize> {
        self.pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                JournalError::internal(format!(
                    "append of {len} bytes at cursor {} exceeds the {}-byte batch region",
                    self.pos,
                    self.bytes.len()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PatternRecord {
        len: usize,
        seed: u8,
    }

    impl RecordEncoder for PatternRecord {
        fn encoded_len(&self) -> usize {
            self.len
        }

        fn encode(&self, dest: &mut [u8]) {
            for (index, byte) in dest.iter_mut().enumerate() {
                *byte = (index as u8) ^ self.seed;
            }
        }
    }

    #[test]
    fn append_advances_cursor_by_payload_size() {
        let mut region = BatchRegion::new(64);
        region.append(&[1, 2, 3]).expect("payload should fit");
        region.append(&[4, 5]).expect("payload should fit");
        assert_eq!(region.pos(), 5);
        assert_eq!(region.capacity(), 64);
    }

    #[test]
    fn append_past_capacity_is_an_invariant_violation() {
        let mut region = BatchRegion::new(4);
        region.append(&[0; 3]).expect("payload should fit");
        let err = region
            .append(&[0; 2])
            .expect_err("overflowing append should fail");
        assert!(matches!(err, JournalError::Internal { .. }));
        assert_eq!(region.pos(), 3, "failed append should not move the cursor");
    }

    #[test]
    fn encoder_writes_in_place_at_the_cursor() {
        let mut region = BatchRegion::new(16);
        region.append(&[0xFF; 2]).expect("payload should fit");
        let written = region
            .append_with(&PatternRecord { len: 4, seed: 0x10 })
            .expect("record should fit");
        assert_eq!(written, 4);
        assert_eq!(region.pos(), 6);

        let mut dest = FlushBuffer::with_capacity(16);
        region.copy_into(&mut dest).expect("batch should fit dest");
        assert_eq!(dest.as_slice(), &[0xFF, 0xFF, 0x10, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn reset_keeps_capacity_and_clears_cursor() {
        let mut region = BatchRegion::new(8);
        region.append(&[9; 8]).expect("payload should fit");
        region.reset();
        assert_eq!(region.pos(), 0);
        region.append(&[1; 8]).expect("full capacity should be reusable");
    }
}
