//! Latency-bounded write coalescing for journal backends.
//!
//! A journal that issues one syscall per appended record drowns in syscall
//! and sync overhead long before the device saturates. [`TimedBuffer`]
//! batches records from any number of producer threads into a single
//! pre-allocated region and hands the region to a [`FlushObserver`] as one
//! unit, flushing when the next record would not fit, when the backend rolls
//! to a new file, or, for records that requested a sync, when the configured
//! timeout elapses. The design target is sub-millisecond sync latency at
//! amortized syscall cost.
//!
//! # Admission
//!
//! Admission is a two-phase reservation because batch capacity depends on
//! the backend's remaining file space, which producers cannot see:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use coalbuf_journal::{
//!     FlushBuffer, FlushObserver, IoCompletion, JournalBufferConfig, TimedBuffer,
//! };
//!
//! struct NullBackend;
//!
//! impl FlushObserver for NullBackend {
//!     fn remaining_bytes(&self) -> usize {
//!         1 << 20
//!     }
//!
//!     fn flush_buffer(
//!         &self,
//!         _buffer: FlushBuffer,
//!         _sync_requested: bool,
//!         callbacks: Vec<Box<dyn IoCompletion>>,
//!     ) {
//!         for callback in callbacks {
//!             callback.done();
//!         }
//!     }
//! }
//!
//! struct Ack;
//!
//! impl IoCompletion for Ack {
//!     fn done(&self) {}
//!     fn on_error(&self, _code: i32, _message: &str) {}
//! }
//!
//! # fn main() -> coalbuf_journal::Result<()> {
//! let buffer = TimedBuffer::new(JournalBufferConfig::new(
//!     64 * 1024,
//!     Duration::from_micros(500),
//! ));
//! buffer.start()?;
//! buffer.set_observer(Some(Arc::new(NullBackend)))?;
//!
//! let record = b"record payload";
//! if buffer.check_size(record.len())? {
//!     buffer.add_bytes(record, true, Box::new(Ack))?;
//! } else {
//!     // Roll the backend to a fresh file, then retry.
//! }
//! buffer.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! A `check_size`/`add_bytes` pair describes one record; callers that admit
//! from several threads serialize the pair under their own append lock, the
//! same lock that serializes their file rollovers.

pub mod backend;
pub mod critical;
pub mod rates;

mod gate;
mod region;
mod timed_buffer;
mod timer;

pub use backend::{FlushBuffer, FlushObserver, IoCompletion, RecordEncoder};
pub use coalbuf_error::{JournalError, Result};
pub use critical::{JournalPath, PathAnalyzer};
pub use rates::{FlushCounters, RateSample};
pub use timed_buffer::{
    DEFAULT_BUFFER_SIZE, DEFAULT_SYNC_TIMEOUT, JournalBufferConfig, TimedBuffer,
};
