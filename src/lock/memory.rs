//! In-process lease table.

use crate::error::{Result, StoreError};
use crate::lock::{obtain_with_retry, Lease, LockService, RetryPolicy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct Held {
    holder: String,
    expires_at: Instant,
}

impl Held {
    #[inline]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// [`LockService`] for a single process.
#[derive(Debug, Default)]
pub struct MemoryLockService {
    held: Mutex<HashMap<String, Held>>,
    policy: RetryPolicy,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            policy,
        }
    }

    fn try_obtain(&self, resource: &str, duration: Duration) -> Option<Lease> {
        let mut held = self.held.lock().unwrap();

        if let Some(current) = held.get(resource) {
            if !current.is_expired() {
                return None;
            }
            trace!(resource = %resource, "Taking over lapsed lease");
        }

        let lease = Lease::new(resource, duration);
        held.insert(
            resource.to_string(),
            Held {
                holder: lease.holder.clone(),
                expires_at: lease.requested_at + duration,
            },
        );
        Some(lease)
    }

    /// Number of resources currently locked (lapsed leases excluded).
    pub fn held_count(&self) -> usize {
        let held = self.held.lock().unwrap();
        held.values().filter(|h| !h.is_expired()).count()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn obtain(&self, resource: &str, lease: Duration) -> Result<Lease> {
        obtain_with_retry(resource, self.policy, move || async move {
            Ok(self.try_obtain(resource, lease))
        })
        .await
    }

    async fn release(&self, lease: Lease) -> Result<()> {
        let mut held = self.held.lock().unwrap();

        match held.get(&lease.resource) {
            Some(current) if current.holder == lease.holder => {
                let lapsed = current.is_expired();
                held.remove(&lease.resource);
                if lapsed {
                    return Err(StoreError::LockNotHeld {
                        resource: lease.resource,
                    });
                }
                Ok(())
            }
            _ => Err(StoreError::LockNotHeld {
                resource: lease.resource,
            }),
        }
    }
}
