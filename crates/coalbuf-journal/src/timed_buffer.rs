//! The timed flushing buffer.
//!
//! `TimedBuffer` sits between journal producers and a block-oriented
//! [`FlushObserver`]. Producers admit serialized records through the
//! two-phase `check_size`/`add_bytes` protocol; the buffer accumulates them
//! in one pre-allocated region and hands the region to the backend when the
//! next record would not fit, when the backend is being rolled to a new
//! file, or when a requested sync has waited out the configured timeout.
//!
//! One monitor (a single `parking_lot::Mutex`) serializes every public
//! operation and the timer thread's flushes. Holding it across the flush is
//! intentional: the flush path is a memcpy and a handoff, and no producer
//! can observe a partially reset region. The backend is invoked under the
//! monitor and must enqueue its I/O and return promptly.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use coalbuf_error::{JournalError, Result};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::{FlushObserver, IoCompletion, RecordEncoder};
use crate::critical::{JournalPath, PathAnalyzer, PathGuard};
use crate::gate::SpinGate;
use crate::rates::{FlushCounters, RateMeter};
use crate::region::BatchRegion;
use crate::timer::{FlushTimer, SleepFn};

/// Default batch region size: 490 KiB, the customary journal buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 501_760;

/// Default sync latency bound.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_micros(500);

/// Construction parameters for [`TimedBuffer`].
pub struct JournalBufferConfig {
    buffer_size: usize,
    timeout: Duration,
    log_rates: bool,
    analyzer: Option<Arc<dyn PathAnalyzer>>,
    sleep: Option<SleepFn>,
}

impl Default for JournalBufferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_SYNC_TIMEOUT)
    }
}

impl JournalBufferConfig {
    /// Configure a region of `buffer_size` bytes and a sync latency bound.
    ///
    /// `buffer_size` must be at least as large as the largest record the
    /// producers will admit; larger records are rejected fatally.
    #[must_use]
    pub fn new(buffer_size: usize, timeout: Duration) -> Self {
        Self {
            buffer_size,
            timeout,
            log_rates: false,
            analyzer: None,
            sleep: None,
        }
    }

    /// Enable the periodic bytes/s + flushes/s logger.
    #[must_use]
    pub fn log_rates(mut self, enabled: bool) -> Self {
        self.log_rates = enabled;
        self
    }

    /// Attach a critical-path analyzer receiving enter/leave notifications
    /// on every public operation.
    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn PathAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Replace the timer thread's sleep primitive.
    ///
    /// Meant for tests and exotic clock sources; production builds use
    /// `thread::sleep`.
    #[must_use]
    pub fn sleep_with(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Some(Arc::new(sleep));
        self
    }
}

/// Monitor-protected state.
struct Inner {
    region: BatchRegion,
    callbacks: Vec<Box<dyn IoCompletion>>,
    /// Upper bound on the write cursor until the next flush. Zero means
    /// "recompute from the backend on the next admission".
    buffer_limit: usize,
    /// Set between a successful `check_size` and its paired `add_bytes`;
    /// a non-forced flush observing it defers rather than publish a
    /// half-reserved slot.
    delay_flush: bool,
    /// Makes the spin-gate open/close idempotent across repeated syncs.
    spinning: bool,
    observer: Option<Arc<dyn FlushObserver>>,
    timer: Option<thread::JoinHandle<()>>,
    rate_meter: Option<RateMeter>,
}

/// Shared core: the monitor plus the flags and counters that are read
/// outside it.
pub(crate) struct Core {
    pub(crate) buffer_size: usize,
    pub(crate) timeout: Duration,
    pub(crate) sleep: SleepFn,
    pub(crate) gate: SpinGate,
    /// Set while the buffer is between `start()` and `stop()`.
    pub(crate) started: AtomicBool,
    /// Close signal observed by the timer thread.
    pub(crate) timer_closed: AtomicBool,
    /// A producer requested a sync that has not been flushed yet.
    pub(crate) sync_pending: AtomicBool,
    /// Mirrors `Inner::observer.is_some()` for the timer's spin path.
    pub(crate) observer_attached: AtomicBool,
    bytes_flushed: AtomicU64,
    flushes_done: AtomicU64,
    log_rates: bool,
    analyzer: Option<Arc<dyn PathAnalyzer>>,
    inner: Mutex<Inner>,
}

impl Core {
    fn enter_path(&self, path: JournalPath) -> PathGuard<'_> {
        PathGuard::enter(self.analyzer.as_ref(), path)
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(JournalError::NotStarted)
        }
    }

    /// Counter snapshot, readable from any thread.
    pub(crate) fn counters(&self) -> FlushCounters {
        FlushCounters {
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            flushes_done: self.flushes_done.load(Ordering::Relaxed),
        }
    }

    /// Timed flush issued by the timer thread. Runs the same
    /// monitor-protected path as producers; failures are logged because
    /// there is no caller to surface them to.
    pub(crate) fn flush_from_timer(&self) {
        let _path = self.enter_path(JournalPath::Flush);
        let mut inner = self.inner.lock();
        if let Err(error) = self.flush_locked(&mut inner, false) {
            tracing::warn!(
                target: "coalbuf.journal::timer",
                %error,
                "timed flush failed"
            );
        }
    }

    /// The flush engine. Caller holds the monitor.
    fn flush_locked(&self, inner: &mut Inner, force: bool) -> Result<()> {
        let pos = inner.region.pos();
        if pos == 0 {
            return Ok(());
        }
        if !force && inner.delay_flush {
            return Ok(());
        }
        let Some(observer) = inner.observer.clone() else {
            return Ok(());
        };

        let mut dest = observer.new_buffer(self.buffer_size, pos);
        inner.region.copy_into(&mut dest)?;
        let sync_requested = self.sync_pending.load(Ordering::Acquire);
        let callbacks = mem::take(&mut inner.callbacks);
        let handed_off = callbacks.len();
        observer.flush_buffer(dest, sync_requested, callbacks);

        if inner.spinning {
            self.gate.close();
            inner.spinning = false;
        }
        self.sync_pending.store(false, Ordering::Release);
        inner.region.reset();
        inner.buffer_limit = 0;
        self.bytes_flushed.fetch_add(pos as u64, Ordering::Relaxed);
        self.flushes_done.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "coalbuf.journal::flush",
            bytes = pos,
            callbacks = handed_off,
            sync = sync_requested,
            "batch handed to backend"
        );
        Ok(())
    }
}

/// The write-coalescing journal buffer.
///
/// Clones share the same buffer; the type is a cheap handle. Producers may
/// call from any number of threads, but each `check_size`/`add_bytes` pair
/// describes one record and must run without interleaving other operations
/// on the same record. In practice the owning journal serializes the pair
/// under its own append lock, exactly as it serializes its file rollovers.
#[derive(Clone)]
pub struct TimedBuffer {
    core: Arc<Core>,
}

impl TimedBuffer {
    /// Build a stopped buffer; the region is allocated here, once.
    #[must_use]
    pub fn new(config: JournalBufferConfig) -> Self {
        let sleep: SleepFn = config.sleep.unwrap_or_else(|| Arc::new(thread::sleep));
        let core = Arc::new(Core {
            buffer_size: config.buffer_size,
            timeout: config.timeout,
            sleep,
            gate: SpinGate::new(),
            started: AtomicBool::new(false),
            timer_closed: AtomicBool::new(false),
            sync_pending: AtomicBool::new(false),
            observer_attached: AtomicBool::new(false),
            bytes_flushed: AtomicU64::new(0),
            flushes_done: AtomicU64::new(0),
            log_rates: config.log_rates,
            analyzer: config.analyzer,
            inner: Mutex::new(Inner {
                region: BatchRegion::new(config.buffer_size),
                callbacks: Vec::new(),
                buffer_limit: 0,
                delay_flush: false,
                spinning: false,
                observer: None,
                timer: None,
                rate_meter: None,
            }),
        });
        Self { core }
    }

    /// Launch the timer thread (and the rate meter when configured).
    /// Idempotent when already started.
    pub fn start(&self) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::Start);
        let mut inner = self.core.inner.lock();
        if self.core.started.load(Ordering::Acquire) {
            return Ok(());
        }

        self.core.timer_closed.store(false, Ordering::Release);
        self.core.gate.close();
        inner.delay_flush = false;
        inner.spinning = false;

        let timer = FlushTimer::new(Arc::clone(&self.core));
        let handle = thread::Builder::new()
            .name("coalbuf-flush-timer".into())
            .spawn(move || timer.run())
            .map_err(|err| {
                JournalError::internal(format!("failed to spawn the flush timer: {err}"))
            })?;
        inner.timer = Some(handle);

        if self.core.log_rates {
            inner.rate_meter = Some(RateMeter::spawn(Arc::clone(&self.core))?);
        }

        self.core.started.store(true, Ordering::Release);
        debug!(target: "coalbuf.journal", "timed buffer started");
        Ok(())
    }

    /// Final flush, then tear the background threads down. Idempotent when
    /// already stopped. A join failure leaves the buffer indeterminate.
    pub fn stop(&self) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::Stop);
        let (timer, rate_meter) = {
            let mut inner = self.core.inner.lock();
            if !self.core.started.load(Ordering::Acquire) {
                return Ok(());
            }
            self.core.flush_locked(&mut inner, false)?;
            inner.observer = None;
            self.core.observer_attached.store(false, Ordering::Release);
            self.core.timer_closed.store(true, Ordering::Release);
            self.core.started.store(false, Ordering::Release);
            (inner.timer.take(), inner.rate_meter.take())
        };

        // Unpark the timer so it can observe the close flag; joining happens
        // outside the monitor because the timer may be waiting on it.
        self.core.gate.open();
        if let Some(meter) = rate_meter {
            meter.stop()?;
        }
        if let Some(handle) = timer {
            handle
                .join()
                .map_err(|_| JournalError::interrupted("joining the flush timer"))?;
        }
        debug!(target: "coalbuf.journal", "timed buffer stopped");
        Ok(())
    }

    /// Install (or detach) the backend. Any in-flight batch is flushed to
    /// the previous backend first.
    pub fn set_observer(&self, observer: Option<Arc<dyn FlushObserver>>) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::SetObserver);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        if inner.observer.is_some() {
            self.core.flush_locked(&mut inner, false)?;
        }
        self.core
            .observer_attached
            .store(observer.is_some(), Ordering::Release);
        inner.observer = observer;
        Ok(())
    }

    /// First half of the admission protocol: reserve room for a record of
    /// `size` bytes.
    ///
    /// Returns `Ok(false)` when the record no longer fits the backend's
    /// current file; the caller rolls the backend over and retries. On
    /// `Ok(true)` the reservation is held (deferring timed flushes) until
    /// the paired `add_bytes`/`add_record` commits it.
    pub fn check_size(&self, size: usize) -> Result<bool> {
        let _path = self.core.enter_path(JournalPath::CheckSize);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        if size > self.core.buffer_size {
            return Err(JournalError::RecordTooLarge {
                size,
                capacity: self.core.buffer_size,
            });
        }

        if inner.buffer_limit == 0 || inner.region.pos().saturating_add(size) > inner.buffer_limit
        {
            // The batch would overflow either the region or the backend's
            // remaining file space: publish it and recompute the limit.
            self.core.flush_locked(&mut inner, false)?;

            let remaining = inner
                .observer
                .as_ref()
                .map_or(0, |observer| observer.remaining_bytes());
            if size > remaining {
                return Ok(false);
            }
            inner.buffer_limit = remaining.min(self.core.buffer_size);
        }
        inner.delay_flush = true;
        Ok(true)
    }

    /// Second half of the admission protocol: commit a pre-encoded record.
    ///
    /// `sync` marks the record as requiring prompt durability; it arms the
    /// timer so a flush fires within the configured timeout. The callback
    /// travels with the batch and is notified by the backend on completion.
    pub fn add_bytes(
        &self,
        payload: &[u8],
        sync: bool,
        callback: Box<dyn IoCompletion>,
    ) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::AddBytes);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        inner.delay_flush = false;
        inner.region.append(payload)?;
        self.commit_record(&mut inner, sync, callback);
        Ok(())
    }

    /// Second half of the admission protocol, zero-copy overload: the
    /// encoder writes directly into the batch region.
    pub fn add_record(
        &self,
        record: &dyn RecordEncoder,
        sync: bool,
        callback: Box<dyn IoCompletion>,
    ) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::AddBytes);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        inner.delay_flush = false;
        inner.region.append_with(record)?;
        self.commit_record(&mut inner, sync, callback);
        Ok(())
    }

    /// Publish the pending batch to the backend, unless a reservation is in
    /// flight (then the flush is deferred to the paired commit).
    pub fn flush(&self) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::Flush);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        self.core.flush_locked(&mut inner, false)
    }

    /// Publish the pending batch even while a reservation is in flight.
    pub fn flush_force(&self) -> Result<()> {
        let _path = self.core.enter_path(JournalPath::Flush);
        let mut inner = self.core.inner.lock();
        self.core.ensure_started()?;
        self.core.flush_locked(&mut inner, true)
    }

    /// Snapshot of the monotonic flush counters.
    #[must_use]
    pub fn counters(&self) -> FlushCounters {
        self.core.counters()
    }

    /// Whether the buffer is between `start()` and `stop()`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::Acquire)
    }

    /// Whether a requested sync is still waiting for a flush.
    #[must_use]
    pub fn pending_sync(&self) -> bool {
        self.core.sync_pending.load(Ordering::Acquire)
    }

    fn commit_record(&self, inner: &mut Inner, sync: bool, callback: Box<dyn IoCompletion>) {
        inner.callbacks.push(callback);
        if sync {
            self.core.sync_pending.store(true, Ordering::Release);
            if !inner.spinning {
                self.core.gate.open();
                inner.spinning = true;
            }
        }
    }
}
