//! Server counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::governor::ConcurrencyGovernor;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    accepted: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    pub(crate) fn record_accepted(&self, n: usize) {
        self.accepted.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a server's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections handed to a handler task or registered for readiness.
    pub accepted: u64,
    /// Requests that reached the protocol handler.
    pub completed: u64,
    /// Connections dropped without a complete request.
    pub abandoned: u64,
    /// Handler tasks holding an admission slot.
    pub in_flight: usize,
}

/// Cloneable read handle, usable from a monitoring thread.
#[derive(Clone)]
pub struct ServerStats {
    pub(crate) counters: Arc<Counters>,
    pub(crate) governor: Arc<ConcurrencyGovernor>,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            in_flight: self.governor.in_flight(),
        }
    }
}
