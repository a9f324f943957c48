//! Concurrency governor: bounded admission for handler tasks.
//!
//! `acquire()` blocks the dispatching thread until a slot is free and hands
//! back an [`AdmissionGuard`]. The guard travels into the submitted task and
//! frees the slot when dropped, on every exit path including a panic.
//! Teardown uses [`ConcurrencyGovernor::wait_idle`] to drain.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct ConcurrencyGovernor {
    capacity: usize,
    in_flight: Mutex<usize>,
    changed: Condvar,
}

impl ConcurrencyGovernor {
    /// Create a gate admitting at most `capacity` tasks (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Block until a slot is free, then take it.
    pub fn acquire(self: &Arc<Self>) -> AdmissionGuard {
        let mut count = self.lock();
        while *count >= self.capacity {
            count = self
                .changed
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count += 1;
        AdmissionGuard {
            governor: Arc::clone(self),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<AdmissionGuard> {
        let mut count = self.lock();
        if *count >= self.capacity {
            return None;
        }
        *count += 1;
        Some(AdmissionGuard {
            governor: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until no task holds a slot.
    ///
    /// `on_tick` runs with the current count every `poll` interval while
    /// waiting.
    pub fn wait_idle(&self, poll: Duration, mut on_tick: impl FnMut(usize)) {
        let mut count = self.lock();
        while *count > 0 {
            let (next, timeout) = self
                .changed
                .wait_timeout(count, poll)
                .unwrap_or_else(PoisonError::into_inner);
            count = next;
            if timeout.timed_out() && *count > 0 {
                on_tick(*count);
            }
        }
    }

    fn release(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        drop(count);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted task. Dropping it frees the slot exactly once.
#[must_use = "dropping the guard immediately releases the slot"]
pub struct AdmissionGuard {
    governor: Arc<ConcurrencyGovernor>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.governor.release();
    }
}
