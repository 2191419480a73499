//! Background flush timer with sleep-accuracy adaption.
//!
//! The timer bounds sync latency: once a producer requests a sync, a flush
//! fires within the configured timeout even if no further traffic arrives.
//! Kernels without high-resolution timers routinely overshoot short sleeps
//! by orders of magnitude, so the loop measures its first
//! [`MAX_CHECKS_ON_SLEEP`] sleeps against a monotonic clock and permanently
//! falls back to spinning with explicit clock comparison when more than half
//! overshoot the 1.5x threshold.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::timed_buffer::Core;

/// Number of sleeps measured before the sleep-vs-spin decision is final.
pub(crate) const MAX_CHECKS_ON_SLEEP: u32 = 20;

/// Injectable sleep primitive; production uses `thread::sleep`.
pub(crate) type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// State owned by the timer thread. Only the thread itself touches the
/// adaption fields, so none of them need synchronization.
pub(crate) struct FlushTimer {
    core: Arc<Core>,
    use_sleep: bool,
    checks: u32,
    failed_checks: u32,
    last_flush: Instant,
}

impl FlushTimer {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            use_sleep: true,
            checks: 0,
            failed_checks: 0,
            last_flush: Instant::now(),
        }
    }

    pub(crate) fn run(mut self) {
        debug!(target: "coalbuf.journal::timer", "flush timer running");
        while !self.core.timer_closed.load(Ordering::Acquire) {
            if self.core.sync_pending.load(Ordering::Acquire) {
                if self.use_sleep {
                    self.core.flush_from_timer();
                    self.last_flush = Instant::now();
                } else if self.core.observer_attached.load(Ordering::Acquire)
                    && self.last_flush.elapsed() > self.core.timeout
                {
                    self.core.flush_from_timer();
                    self.last_flush = Instant::now();
                }
            }
            self.sleep_if_possible();
            self.core.gate.pass();
        }
        debug!(target: "coalbuf.journal::timer", "flush timer stopped");
    }

    fn sleep_if_possible(&mut self) {
        if !self.use_sleep {
            return;
        }
        let timeout = self.core.timeout;
        if self.checks < MAX_CHECKS_ON_SLEEP {
            let begin = Instant::now();
            (self.core.sleep)(timeout);
            if begin.elapsed() > timeout + timeout / 2 {
                self.failed_checks += 1;
            }
            self.checks += 1;
            if self.checks == MAX_CHECKS_ON_SLEEP && self.failed_checks * 2 > MAX_CHECKS_ON_SLEEP
            {
                self.use_sleep = false;
                warn!(
                    target: "coalbuf.journal::timer",
                    failed = self.failed_checks,
                    sampled = MAX_CHECKS_ON_SLEEP,
                    timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX),
                    "kernel sleep resolution is too coarse, falling back to spin waits"
                );
            }
        } else {
            (self.core.sleep)(timeout);
        }
    }
}
