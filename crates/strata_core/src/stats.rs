//! Pool and store statistics.
//!
//! All counters are atomic and can be read while operations are in
//! progress. Values are monotonically increasing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Native call counters of one store.
#[derive(Debug, Default)]
pub struct StoreStats {
    queries: AtomicU64,
    reads: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    errors: AtomicU64,
}

impl StoreStats {
    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_begin(&self) {
        self.begins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    /// Native queries executed.
    pub queries: u64,
    /// Reads by key.
    pub reads: u64,
    /// Rows inserted.
    pub inserts: u64,
    /// Rows updated.
    pub updates: u64,
    /// Delete calls.
    pub deletes: u64,
    /// Native transactions begun.
    pub begins: u64,
    /// Native transactions committed.
    pub commits: u64,
    /// Native transactions rolled back.
    pub rollbacks: u64,
    /// Failed native calls.
    pub errors: u64,
}

/// Connection pool counters, across all stores.
#[derive(Debug, Default)]
pub struct PoolStats {
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    closed: AtomicU64,
    exhausted: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Native connections opened.
    pub created: u64,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Connections handed back.
    pub released: u64,
    /// Native connections closed.
    pub closed: u64,
    /// Acquisitions refused because the pool was exhausted.
    pub exhausted: u64,
}

impl PoolStatsSnapshot {
    /// Connections currently checked out.
    #[must_use]
    pub const fn in_use(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_counters() {
        let stats = StoreStats::default();
        stats.record_query();
        stats.record_query();
        stats.record_insert();
        stats.record_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.queries, 2);
        assert_eq!(snap.inserts, 1);
        assert_eq!(snap.rollbacks, 1);
        assert_eq!(snap.commits, 0);
    }

    #[test]
    fn pool_in_use() {
        let stats = PoolStats::default();
        stats.record_acquired();
        stats.record_acquired();
        stats.record_released();
        assert_eq!(stats.snapshot().in_use(), 1);
    }
}
