//! One-shot readiness gate.
//!
//! The worker opens the gate exactly once, on any terminal outcome of the
//! launch attempt. Waiters block until that happens and never block again
//! afterwards, no matter how many of them arrive or how often they re-wait.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// A sticky boolean the worker flips open once launch has reached a terminal
/// state. Re-opening is a no-op; the gate never closes again.
#[derive(Debug)]
pub struct ReadinessGate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Open the gate and wake every current waiter. Idempotent.
    pub fn open(&self) {
        let mut open = self.lock();
        *open = true;
        self.condvar.notify_all();
    }

    /// Block until the gate is open. Returns immediately once it ever was.
    pub fn wait(&self) {
        let mut open = self.lock();
        while !*open {
            open = match self.condvar.wait(open) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until the gate is open or `timeout` elapses. Returns whether
    /// the gate was open on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let open = self.lock();
        let (open, _result) = match self.condvar.wait_timeout_while(open, timeout, |open| !*open) {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        *open
    }

    pub fn is_open(&self) -> bool {
        *self.lock()
    }

    // A waiter panicking while holding the lock must not wedge the gate;
    // the bool is always coherent, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, bool> {
        match self.open.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
