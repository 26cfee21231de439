//! Lock Service
//!
//! A lease-based mutual-exclusion primitive keyed by resource name (the
//! record key). A [`Lease`] is exclusive for its duration and must be
//! released explicitly; if the holder never releases it, it lapses on its
//! own so a crashed holder cannot wedge a key forever.
//!
//! Obtaining retries according to a [`RetryPolicy`]. With zero retries it
//! fails fast with `Contention`.
//!
//! Implementations:
//! - [`MemoryLockService`]: in-process lease table
//! - [`RedisLockService`]: `SET NX PX` + compare-and-delete release

pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};

pub use memory::MemoryLockService;
pub use self::redis::RedisLockService;

/// An exclusive, time-bounded grant on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The locked resource
    pub resource: String,
    /// Unique id of this acquisition; release only succeeds with it
    pub holder: String,
    /// How long the grant lasts if never released
    pub duration: Duration,
    /// Taken before the request went out, so the local view of the lease
    /// never outlives the server's
    pub requested_at: Instant,
}

impl Lease {
    pub(crate) fn new(resource: &str, duration: Duration) -> Self {
        Self {
            resource: resource.to_string(),
            holder: uuid::Uuid::new_v4().to_string(),
            duration,
            requested_at: Instant::now(),
        }
    }

    /// Time left before the lease lapses on its own.
    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.requested_at.elapsed())
    }

    pub fn is_lapsed(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// How `obtain` behaves while another holder has the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub retries: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// One attempt, no waiting.
    pub const fn fail_fast() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub const fn linear(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(20, Duration::from_millis(10))
    }
}

#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Obtains an exclusive lease on `resource`, or fails with `Contention`.
    async fn obtain(&self, resource: &str, lease: Duration) -> Result<Lease>;

    /// Gives the lease back. Fails with `LockNotHeld` if it already lapsed
    /// or someone else holds the resource now.
    async fn release(&self, lease: Lease) -> Result<()>;
}

/// Runs `try_once` until it grants a lease or the policy is exhausted.
pub(crate) async fn obtain_with_retry<F, Fut>(
    resource: &str,
    policy: RetryPolicy,
    mut try_once: F,
) -> Result<Lease>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<Lease>>>,
{
    let mut attempt = 0;
    loop {
        if let Some(lease) = try_once().await? {
            return Ok(lease);
        }
        if attempt >= policy.retries {
            return Err(crate::error::StoreError::Contention {
                resource: resource.to_string(),
            });
        }
        attempt += 1;
        tokio::time::sleep(policy.backoff).await;
    }
}
