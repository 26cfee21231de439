//! Expiry Coordinator
//!
//! Every successful write stamps the record with a fresh [`ModificationToken`],
//! records it in the token index, and spawns a deferred task that wakes up
//! one TTL later. The task only evicts when the index still holds *its*
//! token, so later writes silently cancel earlier tasks without any bookkeeping.
//!
//! ## Eviction protocol
//!
//! ```text
//!   sleep(ttl)
//!      │
//!      ▼
//!   index == token? ──no──► Superseded
//!      │ yes
//!      ▼
//!   obtain lock(key) ──fail──► Abandoned
//!      │
//!      ▼   ┌─ deadline: lease minus margin ──────────────► Abandoned
//!   index == token? ──no──► Superseded      (decisive check, under the lock)
//!      │ yes
//!      ▼
//!   archive(key, token, value)
//!      │
//!      ▼
//!   lease still good? ──no──► Abandoned
//!      │
//!      ▼
//!   delete record + index if index == token ──► Expired   (one atomic step)
//!      │                                  └──► Superseded
//!      ▼
//!   release lock
//! ```
//!
//! The locked section runs under a deadline that ends `lease_margin` before
//! the lease lapses, and the final delete is fenced by the token inside the
//! store. An eviction that outlives its lease therefore gives up, and even a
//! delete that lands late cannot remove a newer write.
//!
//! Explicit deletes take the same per-key lock, and so do writes unless
//! `guard_writes` is switched off. Nothing is serialized across keys.

pub mod reaper;
pub mod stats;

use crate::archive::PersistenceSink;
use crate::error::{Result, StoreError};
use crate::lock::{Lease, LockService};
use crate::storage::RecordStore;
use crate::token::{ModificationToken, TokenClock};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

pub use reaper::{start_index_reaper, IndexReaper, SweepConfig};
pub use stats::{ExpirySnapshot, ExpiryStats};

/// Store round trips an eviction makes while holding the lock: the token
/// re-check, the value read and the fenced delete.
const LOCKED_STORE_CALLS: u32 = 3;

/// What to do when the archive write fails during an eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchivePolicy {
    /// Log, count, and delete anyway.
    #[default]
    BestEffort,
    /// Keep the record; the reaper retries on its next pass.
    Required,
}

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How long a record lives after its latest write
    pub ttl: Duration,

    /// Lease taken on a key while writing, deleting or evicting it.
    /// Must exceed the worst-case check-archive-delete time.
    pub lock_lease: Duration,

    /// Whether writes take the key's lock as well
    pub guard_writes: bool,

    pub archive_policy: ArchivePolicy,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            lock_lease: Duration::from_secs(5),
            guard_writes: true,
            archive_policy: ArchivePolicy::BestEffort,
        }
    }
}

impl ExpiryConfig {
    /// Part of the lease held in reserve. An eviction stops this long
    /// before its lease would lapse.
    pub fn lease_margin(&self) -> Duration {
        self.lock_lease / 5
    }

    /// Whether an eviction fits in the lease when every store call takes
    /// as long as `slowest_call`.
    pub fn lease_covers(&self, slowest_call: Duration) -> bool {
        self.lock_lease.saturating_sub(self.lease_margin()) >= slowest_call * LOCKED_STORE_CALLS
    }
}

/// Result of one eviction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The record was removed. `archived` is false only when the index
    /// pointed at a record that was already gone, or archiving failed
    /// under [`ArchivePolicy::BestEffort`].
    Expired { archived: bool },
    /// A newer write (or a delete) got there first.
    Superseded,
    /// The lock or the store was unavailable, or the lease ran out; the
    /// record is left as is.
    Abandoned(String),
    /// Archiving failed under [`ArchivePolicy::Required`].
    Retained,
}

struct Inner {
    store: RecordStore,
    locks: Arc<dyn LockService>,
    sink: Arc<dyn PersistenceSink>,
    config: ExpiryConfig,
    clock: TokenClock,
    stats: ExpiryStats,
    shutdown_tx: watch::Sender<bool>,
}

/// Writes, reads and deletes records, and evicts them after their TTL.
///
/// Cheap to clone; clones share state, pending tasks and counters.
#[derive(Clone)]
pub struct ExpiryCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExpiryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryCoordinator")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ExpiryCoordinator {
    pub fn new(
        store: RecordStore,
        locks: Arc<dyn LockService>,
        sink: Arc<dyn PersistenceSink>,
        config: ExpiryConfig,
    ) -> Self {
        if config.lock_lease.is_zero() {
            warn!("Lock lease is zero; every eviction will be abandoned");
        }
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                locks,
                sink,
                config,
                clock: TokenClock::new(),
                stats: ExpiryStats::default(),
                shutdown_tx,
            }),
        }
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    pub fn stats(&self) -> ExpirySnapshot {
        self.inner.stats.snapshot()
    }

    /// Stores `value` under `key` and schedules its eviction.
    ///
    /// Returns the token of this write. No eviction is scheduled when the
    /// write fails.
    pub async fn write(&self, key: &str, value: Bytes) -> Result<ModificationToken> {
        let token = if self.inner.config.guard_writes {
            let lease = self.obtain(key).await?;
            let result = self.store_write(key, value).await;
            self.release(lease).await;
            result?
        } else {
            self.store_write(key, value).await?
        };

        ExpiryStats::bump(&self.inner.stats.writes);
        self.schedule(key.to_string(), token);
        Ok(token)
    }

    async fn store_write(&self, key: &str, value: Bytes) -> Result<ModificationToken> {
        let token = self.inner.clock.next();
        // Index first: if the record write then fails, the old value keeps a
        // token no pending task holds and only the reaper can evict it.
        self.inner.store.set_index(key, token).await?;
        self.inner.store.set(key, value).await?;
        trace!(key = %key, token = %token, "Record written");
        Ok(token)
    }

    /// Like [`write`](Self::write), but only when `key` has no record yet.
    ///
    /// Fails with `AlreadyExists` otherwise. The existence check is done by
    /// the store itself, so two racing creates cannot both succeed.
    pub async fn create(&self, key: &str, value: Bytes) -> Result<ModificationToken> {
        let token = if self.inner.config.guard_writes {
            let lease = self.obtain(key).await?;
            let result = self.store_create(key, value).await;
            self.release(lease).await;
            result?
        } else {
            self.store_create(key, value).await?
        };

        ExpiryStats::bump(&self.inner.stats.writes);
        self.schedule(key.to_string(), token);
        Ok(token)
    }

    async fn store_create(&self, key: &str, value: Bytes) -> Result<ModificationToken> {
        let token = self.inner.clock.next();
        if !self.inner.store.set_if_absent(key, value).await? {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        if let Err(e) = self.inner.store.set_index(key, token).await {
            // A record with no index entry would never be evicted.
            if let Err(undo) = self.inner.store.delete(key).await {
                warn!(key = %key, error = %undo, "Failed to roll back created record");
            }
            return Err(e);
        }
        trace!(key = %key, token = %token, "Record created");
        Ok(token)
    }

    /// Returns the current value, or `NotFound`. Takes no lock.
    pub async fn read(&self, key: &str) -> Result<Bytes> {
        self.inner.store.get(key).await
    }

    /// Removes the record and its index entry right away.
    ///
    /// Fails with `NotFound` when there was no record. A pending eviction
    /// for the removed record finds the index entry gone and does nothing.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let lease = self.obtain(key).await?;
        let result = self.store_delete(key).await;
        self.release(lease).await;
        result?;

        ExpiryStats::bump(&self.inner.stats.deletes);
        debug!(key = %key, "Record deleted");
        Ok(())
    }

    async fn store_delete(&self, key: &str) -> Result<()> {
        self.inner.store.delete_index(key).await?;
        if self.inner.store.delete(key).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(key.to_string()))
        }
    }

    /// Stops every pending eviction task. Records stay where they are.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        debug!("Expiry coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    fn schedule(&self, key: String, token: ModificationToken) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            trace!(key = %key, token = %token, "Shut down, not scheduling eviction");
            return;
        }

        let coordinator = self.clone();
        let ttl = self.inner.config.ttl;
        ExpiryStats::bump(&self.inner.stats.scheduled);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {}
                _ = shutdown_rx.changed() => {
                    trace!(key = %key, token = %token, "Eviction cancelled by shutdown");
                    return;
                }
            }
            coordinator.run_expiry(&key, token).await;
        });
    }

    /// Evicts `key` if its latest write is still `token`.
    ///
    /// This is the body of every deferred task, and the reaper calls it for
    /// stale index entries. Errors never escape; they become
    /// [`ExpiryOutcome::Abandoned`].
    pub async fn run_expiry(&self, key: &str, token: ModificationToken) -> ExpiryOutcome {
        let outcome = match self.try_expire(key, token).await {
            Ok(outcome) => outcome,
            Err(e) => ExpiryOutcome::Abandoned(e.to_string()),
        };

        let stats = &self.inner.stats;
        match &outcome {
            ExpiryOutcome::Expired { archived } => {
                ExpiryStats::bump(&stats.expired);
                debug!(key = %key, token = %token, archived = archived, "Record expired");
            }
            ExpiryOutcome::Superseded => {
                ExpiryStats::bump(&stats.superseded);
                trace!(key = %key, token = %token, "Eviction superseded");
            }
            ExpiryOutcome::Abandoned(reason) => {
                ExpiryStats::bump(&stats.abandoned);
                warn!(key = %key, token = %token, reason = %reason, "Eviction abandoned");
            }
            ExpiryOutcome::Retained => {
                ExpiryStats::bump(&stats.retained);
            }
        }
        outcome
    }

    async fn try_expire(&self, key: &str, token: ModificationToken) -> Result<ExpiryOutcome> {
        // Early exit only; the check that counts is repeated under the lock.
        if self.inner.store.get_index(key).await? != Some(token) {
            return Ok(ExpiryOutcome::Superseded);
        }

        let lease = self.obtain(key).await?;
        let budget = lease
            .remaining()
            .saturating_sub(self.inner.config.lease_margin());

        let result = match tokio::time::timeout(budget, self.expire_locked(key, token, &lease)).await
        {
            Ok(result) => result,
            Err(_) => Ok(ExpiryOutcome::Abandoned(format!(
                "not finished {:?} into a {:?} lease",
                budget, lease.duration
            ))),
        };
        self.release(lease).await;
        result
    }

    async fn expire_locked(
        &self,
        key: &str,
        token: ModificationToken,
        lease: &Lease,
    ) -> Result<ExpiryOutcome> {
        let store = &self.inner.store;
        if store.get_index(key).await? != Some(token) {
            return Ok(ExpiryOutcome::Superseded);
        }

        let value = match store.get(key).await {
            Ok(value) => Some(value),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut archived = false;
        if let Some(value) = value {
            match self.inner.sink.archive(key, token, value).await {
                Ok(()) => archived = true,
                Err(e) if e.is_already_archived() => {
                    trace!(key = %key, token = %token, "Snapshot left by an earlier attempt");
                    archived = true;
                }
                Err(e) => {
                    ExpiryStats::bump(&self.inner.stats.archive_failures);
                    match self.inner.config.archive_policy {
                        ArchivePolicy::Required => {
                            warn!(key = %key, token = %token, error = %e, "Archive failed, keeping record");
                            return Ok(ExpiryOutcome::Retained);
                        }
                        ArchivePolicy::BestEffort => {
                            warn!(key = %key, token = %token, error = %e, "Archive failed, evicting anyway");
                        }
                    }
                }
            }
        }

        // Inside the margin another holder may own the key before the delete lands.
        if lease.remaining() < self.inner.config.lease_margin() {
            return Ok(ExpiryOutcome::Abandoned(format!(
                "{:?} lease nearly lapsed before delete",
                lease.duration
            )));
        }

        if !store.delete_fenced(key, token).await? {
            debug!(key = %key, token = %token, archived = archived, "Index moved on during eviction");
            return Ok(ExpiryOutcome::Superseded);
        }
        Ok(ExpiryOutcome::Expired { archived })
    }

    async fn obtain(&self, key: &str) -> Result<Lease> {
        self.inner.locks.obtain(key, self.inner.config.lock_lease).await
    }

    async fn release(&self, lease: Lease) {
        let resource = lease.resource.clone();
        let lapsed = lease.is_lapsed();
        match self.inner.locks.release(lease).await {
            Ok(()) => {}
            Err(StoreError::LockNotHeld { .. }) if lapsed => {
                debug!(key = %resource, "Lease lapsed before release");
            }
            Err(e) => warn!(key = %resource, error = %e, "Failed to release lock"),
        }
    }
}
