use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Receives counts of the work a row store performs.
///
/// Stores call into this on every statement, so implementations must be cheap
/// and thread-safe.
pub trait StoreMetrics: Send + Sync {
    /// Records one read statement (`get`, `select`, `count`, `max`).
    fn query(&self);

    /// Records rows materialized by a read.
    fn rows_read(&self, rows: u64);

    /// Records rows inserted, updated or deleted by a write.
    fn rows_written(&self, rows: u64);

    /// Records an outermost atomic unit that committed.
    fn transaction(&self);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn query(&self) {}
    fn rows_read(&self, _rows: u64) {}
    fn rows_written(&self, _rows: u64) {}
    fn transaction(&self) {}
}

/// Atomic counters for every recorded event.
#[derive(Default)]
pub struct CounterMetrics {
    /// Read statements issued.
    pub queries: AtomicU64,
    /// Rows materialized by reads.
    pub rows_read: AtomicU64,
    /// Rows touched by writes.
    pub rows_written: AtomicU64,
    /// Committed atomic units.
    pub transactions: AtomicU64,
}

impl StoreMetrics for CounterMetrics {
    fn query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    fn rows_read(&self, rows: u64) {
        self.rows_read.fetch_add(rows, Ordering::Relaxed);
    }

    fn rows_written(&self, rows: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    fn transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }
}

impl CounterMetrics {
    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.rows_read.store(0, Ordering::Relaxed);
        self.rows_written.store(0, Ordering::Relaxed);
        self.transactions.store(0, Ordering::Relaxed);
    }
}

/// Plain copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub transactions: u64,
}

/// Metrics sink used when a store is built without one.
pub fn default_metrics() -> Arc<dyn StoreMetrics> {
    Arc::new(NoopMetrics)
}
