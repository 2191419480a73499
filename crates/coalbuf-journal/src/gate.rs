//! Single-permit parking gate for the flush timer.
//!
//! Closed: the permit is held by the core and [`SpinGate::pass`] parks the
//! caller. Open: a sync is pending and `pass` degrades to a plain yield,
//! keeping the timer thread hot enough to fire a timed flush. This is a
//! parking primitive, not a counting semaphore.

use std::thread;

use parking_lot::{Condvar, Mutex};

pub(crate) struct SpinGate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl SpinGate {
    /// A gate starts closed; `start()` owns the permit until a sync arrives.
    pub(crate) fn new() -> Self {
        Self {
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    /// Release the permit, waking a parked timer.
    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.opened.notify_all();
    }

    /// Take the permit back; the next `pass` parks.
    pub(crate) fn close(&self) {
        *self.open.lock() = false;
    }

    /// Acquire-yield-release: parks while the gate is closed, otherwise a
    /// cheap yield.
    pub(crate) fn pass(&self) {
        {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn pass_parks_until_opened() {
        let gate = Arc::new(SpinGate::new());
        let passed = Arc::new(AtomicBool::new(false));

        let handle = {
            let gate = Arc::clone(&gate);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                gate.pass();
                passed.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(
            !passed.load(Ordering::Acquire),
            "a closed gate should park the caller"
        );

        gate.open();
        handle.join().expect("parked thread should finish");
        assert!(passed.load(Ordering::Acquire));
    }

    #[test]
    fn open_gate_is_a_plain_yield() {
        let gate = SpinGate::new();
        gate.open();
        gate.pass();
        gate.pass();
        gate.close();
        gate.open();
        gate.pass();
    }
}
