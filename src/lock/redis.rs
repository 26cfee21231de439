//! Redis-backed lock service.
//!
//! Obtain is `SET <prefix><resource> <holder> NX PX <ms>`: it only succeeds
//! when nobody holds the key, and the key expires on its own after the lease.
//! Release runs a script that deletes the key only if it still holds our
//! holder id, so a lapsed holder cannot delete a newer holder's lock.
//!
//! Neither command is resent when its reply is lost; the call fails with
//! `Transport` and an unacknowledged lease simply lapses.

use crate::error::{Result, StoreError};
use crate::lock::{obtain_with_retry, Lease, LockService, RetryPolicy};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

pub(crate) const RELEASE_SCRIPT: &str = r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("del", KEYS[1]) else return 0 end"#;

/// Key prefix separating lock keys from everything else in the keyspace.
pub const DEFAULT_KEY_PREFIX: &str = "lock:";

#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    prefix: String,
    policy: RetryPolicy,
    release: Script,
}

impl std::fmt::Debug for RedisLockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockService")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RedisLockService {
    pub fn new(conn: ConnectionManager, policy: RetryPolicy) -> Self {
        Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            policy,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn lock_key(&self, resource: &str) -> String {
        format!("{}{}", self.prefix, resource)
    }

    async fn try_obtain(&self, resource: &str, duration: Duration) -> Result<Option<Lease>> {
        let lease = Lease::new(resource, duration);
        let millis = duration.as_millis().max(1) as u64;

        let mut conn = self.conn.clone();
        let granted: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(resource))
            .arg(&lease.holder)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await?;

        Ok(granted.map(|_| lease))
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn obtain(&self, resource: &str, lease: Duration) -> Result<Lease> {
        obtain_with_retry(resource, self.policy, move || self.try_obtain(resource, lease)).await
    }

    async fn release(&self, lease: Lease) -> Result<()> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release
            .key(self.lock_key(&lease.resource))
            .arg(&lease.holder)
            .invoke_async(&mut conn)
            .await?;

        if released == 1 {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld {
                resource: lease.resource,
            })
        }
    }
}
