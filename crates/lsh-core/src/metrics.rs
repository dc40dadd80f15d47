//! Global atomic counters for daemon observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on a daemon tick or at shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    jobs_dispatched: AtomicU64,
    executions_completed: AtomicU64,
    ipc_requests: AtomicU64,
    sync_pushes: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            jobs_dispatched: AtomicU64::new(0),
            executions_completed: AtomicU64::new(0),
            ipc_requests: AtomicU64::new(0),
            sync_pushes: AtomicU64::new(0),
        }
    }

    pub fn inc_jobs_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_executions_completed(&self) {
        self.executions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ipc_requests(&self) {
        self.ipc_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sync_pushes(&self) {
        self.sync_pushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            jobs_dispatched = self.jobs_dispatched(),
            executions_completed = self.executions_completed(),
            ipc_requests = self.ipc_requests(),
            sync_pushes = self.sync_pushes(),
        );
    }

    pub fn jobs_dispatched(&self) -> u64 {
        self.jobs_dispatched.load(Ordering::Relaxed)
    }

    pub fn executions_completed(&self) -> u64 {
        self.executions_completed.load(Ordering::Relaxed)
    }

    pub fn ipc_requests(&self) -> u64 {
        self.ipc_requests.load(Ordering::Relaxed)
    }

    pub fn sync_pushes(&self) -> u64 {
        self.sync_pushes.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.jobs_dispatched.store(0, Ordering::Relaxed);
        self.executions_completed.store(0, Ordering::Relaxed);
        self.ipc_requests.store(0, Ordering::Relaxed);
        self.sync_pushes.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_jobs_dispatched();
        m.inc_jobs_dispatched();
        assert_eq!(m.jobs_dispatched(), 2);

        m.inc_ipc_requests();
        assert_eq!(m.ipc_requests(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_executions_completed();
        m.inc_sync_pushes();
        m.reset();
        assert_eq!(m.executions_completed(), 0);
        assert_eq!(m.sync_pushes(), 0);
    }
}
