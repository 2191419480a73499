//! Periodic flush-rate sampling.
//!
//! Counters use `AtomicU64` with `Ordering::Relaxed`; samples are emitted on
//! the `coalbuf.journal::rates` target every two seconds and serialize to
//! JSON for machine consumption. No effect on correctness; the meter swallows
//! its own failures.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use coalbuf_error::{JournalError, Result};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::info;

use crate::timed_buffer::Core;

/// Sampling window of the rate meter.
pub(crate) const RATE_SAMPLE_PERIOD: Duration = Duration::from_secs(2);

/// Monotonic flush counters, snapshotted outside the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushCounters {
    /// Total bytes handed to the backend since construction.
    pub bytes_flushed: u64,
    /// Total flushes handed to the backend since construction.
    pub flushes_done: u64,
}

/// One rate-meter sample over a measured window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSample {
    /// Bytes per second over the window.
    pub bytes_per_sec: f64,
    /// Flushes per second over the window.
    pub flushes_per_sec: f64,
    /// Measured window length in seconds.
    pub window_secs: f64,
}

/// Compute the rate sample between two counter snapshots.
///
/// Returns `None` when the window is degenerate (zero or negative elapsed
/// time after clock granularity).
pub(crate) fn compute_sample(
    prev: FlushCounters,
    current: FlushCounters,
    window: Duration,
) -> Option<RateSample> {
    let window_secs = window.as_secs_f64();
    if window_secs <= 0.0 {
        return None;
    }
    let bytes = current.bytes_flushed.saturating_sub(prev.bytes_flushed);
    let flushes = current.flushes_done.saturating_sub(prev.flushes_done);
    Some(RateSample {
        bytes_per_sec: bytes as f64 / window_secs,
        flushes_per_sec: flushes as f64 / window_secs,
        window_secs,
    })
}

struct MeterSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background sampler thread, alive between `start()` and `stop()`.
pub(crate) struct RateMeter {
    signal: Arc<MeterSignal>,
    handle: thread::JoinHandle<()>,
}

impl RateMeter {
    pub(crate) fn spawn(core: Arc<Core>) -> Result<Self> {
        let signal = Arc::new(MeterSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("coalbuf-rate-meter".into())
            .spawn(move || run(&core, &thread_signal))
            .map_err(|err| {
                JournalError::internal(format!("failed to spawn the rate meter: {err}"))
            })?;
        Ok(Self { signal, handle })
    }

    /// Signal the sampler and join it.
    pub(crate) fn stop(self) -> Result<()> {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        self.handle
            .join()
            .map_err(|_| JournalError::interrupted("joining the rate meter"))
    }
}

fn run(core: &Arc<Core>, signal: &Arc<MeterSignal>) {
    let mut prev = core.counters();
    let mut prev_at = Instant::now();

    loop {
        {
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                let _ = signal.wake.wait_for(&mut stopped, RATE_SAMPLE_PERIOD);
            }
            if *stopped {
                return;
            }
        }

        let current = core.counters();
        let window = prev_at.elapsed();
        if let Some(sample) = compute_sample(prev, current, window) {
            info!(
                target: "coalbuf.journal::rates",
                bytes_per_sec = sample.bytes_per_sec,
                flushes_per_sec = sample.flushes_per_sec,
                window_secs = sample.window_secs,
                "journal flush rates"
            );
        }
        prev = current;
        prev_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reports_deltas_per_second() {
        let prev = FlushCounters {
            bytes_flushed: 1_000,
            flushes_done: 10,
        };
        let current = FlushCounters {
            bytes_flushed: 5_000,
            flushes_done: 30,
        };
        let sample = compute_sample(prev, current, Duration::from_secs(2))
            .expect("a two-second window should produce a sample");
        assert!((sample.bytes_per_sec - 2_000.0).abs() < f64::EPSILON);
        assert!((sample.flushes_per_sec - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_window_produces_no_sample() {
        let counters = FlushCounters::default();
        assert!(compute_sample(counters, counters, Duration::ZERO).is_none());
    }

    #[test]
    fn counter_regression_saturates_to_zero() {
        let prev = FlushCounters {
            bytes_flushed: 100,
            flushes_done: 2,
        };
        let sample = compute_sample(prev, FlushCounters::default(), Duration::from_secs(2))
            .expect("window is valid");
        assert!(sample.bytes_per_sec.abs() < f64::EPSILON);
    }

    #[test]
    fn sample_serializes_for_machine_consumption() {
        let sample = RateSample {
            bytes_per_sec: 512.0,
            flushes_per_sec: 4.0,
            window_secs: 2.0,
        };
        let json = serde_json::to_value(sample).expect("sample should serialize");
        assert_eq!(json["bytes_per_sec"], 512.0);
        assert_eq!(json["flushes_per_sec"], 4.0);
    }
}
