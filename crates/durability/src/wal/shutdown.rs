//! One-shot shutdown broadcast
//!
//! `log` callers poll [`ShutdownSignal::is_triggered`] on every call, so the
//! flag is an atomic. The checkpoint loop sleeps on a condvar instead of a
//! plain sleep so that `stop` wakes it immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Broadcast shutdown flag.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal and wake all waiters.
    ///
    /// Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let mut fired = self.lock.lock();
        if *fired {
            return false;
        }
        *fired = true;
        self.triggered.store(true, Ordering::Release);
        self.cond.notify_all();
        true
    }

    /// Whether the signal has fired
    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Block for up to `timeout` or until the signal fires.
    ///
    /// Returns `true` if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.lock.lock();
        while !*fired {
            if self.cond.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}
