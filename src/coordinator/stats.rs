//! Eviction counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ExpiryStats {
    pub(crate) writes: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) scheduled: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) superseded: AtomicU64,
    pub(crate) abandoned: AtomicU64,
    pub(crate) retained: AtomicU64,
    pub(crate) archive_failures: AtomicU64,
}

impl ExpiryStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExpirySnapshot {
        ExpirySnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retained: self.retained.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ExpiryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirySnapshot {
    /// Successful writes
    pub writes: u64,
    /// Successful explicit deletes
    pub deletes: u64,
    /// Deferred expiry tasks spawned
    pub scheduled: u64,
    /// Records evicted by an expiry task or the reaper
    pub expired: u64,
    /// Expiry checks that found a newer token (or no record)
    pub superseded: u64,
    /// Expiry checks given up on lock or transport errors
    pub abandoned: u64,
    /// Evictions skipped because archiving failed under a strict policy
    pub retained: u64,
    pub archive_failures: u64,
}
