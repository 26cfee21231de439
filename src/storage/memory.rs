//! In-Process Hash Store
//!
//! A thread-safe stand-in for a remote hash-table server, used by the
//! `memory` backend and by tests.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MemoryHashStore                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ coll →  │ │ coll →  │ │ coll →  │ │ coll →  │            │
//! │  │ field → │ │ field → │ │ field → │ │ field → │            │
//! │  │ value   │ │ value   │ │ value   │ │ value   │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fields are distributed across shards by hashing the field name, so a
//! record and its index entry (same field, different collections) live in
//! the same shard. Operations on different keys rarely touch the same lock.

use crate::error::Result;
use crate::storage::HashStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Number of shards. 64 keeps contention low without much memory overhead.
const NUM_SHARDS: usize = 64;

type Collections = HashMap<String, HashMap<String, Bytes>>;

#[derive(Debug, Default)]
struct Shard {
    collections: RwLock<Collections>,
}

/// Operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageStats {
    pub fields: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
}

/// Sharded in-memory implementation of [`HashStore`].
pub struct MemoryHashStore {
    shards: Vec<Shard>,
    field_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
}

impl std::fmt::Debug for MemoryHashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHashStore")
            .field("shards", &self.shards.len())
            .field("fields", &self.field_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MemoryHashStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            field_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, field: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        field.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Total number of fields across all collections.
    pub fn len(&self) -> u64 {
        self.field_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            fields: self.field_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
        }
    }

    fn remove_field(&self, collections: &mut Collections, collection: &str, field: &str) -> bool {
        let Some(fields) = collections.get_mut(collection) else {
            return false;
        };

        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            collections.remove(collection);
        }
        if removed {
            self.field_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Removes everything.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.collections.write().unwrap().clear();
        }
        self.field_count.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn hget(&self, collection: &str, field: &str) -> Result<Option<Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let collections = self.shard(field).collections.read().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn hset(&self, collection: &str, field: &str, value: Bytes) -> Result<()> {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut collections = self.shard(field).collections.write().unwrap();
        let is_new = collections
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string(), value)
            .is_none();

        if is_new {
            self.field_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn hsetnx(&self, collection: &str, field: &str, value: Bytes) -> Result<bool> {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut collections = self.shard(field).collections.write().unwrap();
        let fields = collections.entry(collection.to_string()).or_default();
        if fields.contains_key(field) {
            return Ok(false);
        }
        fields.insert(field.to_string(), value);
        self.field_count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    async fn hdel(&self, collection: &str, field: &str) -> Result<bool> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut collections = self.shard(field).collections.write().unwrap();
        Ok(self.remove_field(&mut collections, collection, field))
    }

    async fn hgetall(&self, collection: &str) -> Result<Vec<(String, Bytes)>> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            let collections = shard.collections.read().unwrap();
            if let Some(fields) = collections.get(collection) {
                entries.extend(fields.iter().map(|(f, v)| (f.clone(), v.clone())));
            }
        }
        Ok(entries)
    }

    async fn hdel_fenced(
        &self,
        index: &str,
        records: &str,
        field: &str,
        expected: &[u8],
    ) -> Result<bool> {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        // Both collections keep `field` in the same shard, so one write
        // lock covers the check and both removals.
        let mut collections = self.shard(field).collections.write().unwrap();
        let current = collections.get(index).and_then(|fields| fields.get(field));
        if current.map(|v| &v[..]) != Some(expected) {
            return Ok(false);
        }

        self.remove_field(&mut collections, records, field);
        Ok(self.remove_field(&mut collections, index, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryHashStore::new();

        store.hset("users", "alice", Bytes::from("v1")).await.unwrap();
        assert_eq!(
            store.hget("users", "alice").await.unwrap(),
            Some(Bytes::from("v1"))
        );
        assert_eq!(store.hget("users", "bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let store = MemoryHashStore::new();

        store.hset("users", "alice", Bytes::from("record")).await.unwrap();
        store
            .hset("modified_user_time", "alice", Bytes::from("17"))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        assert!(store.hdel("modified_user_time", "alice").await.unwrap());
        assert_eq!(
            store.hget("users", "alice").await.unwrap(),
            Some(Bytes::from("record"))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_count() {
        let store = MemoryHashStore::new();

        store.hset("users", "alice", Bytes::from("v1")).await.unwrap();
        store.hset("users", "alice", Bytes::from("v2")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.hget("users", "alice").await.unwrap(),
            Some(Bytes::from("v2"))
        );
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_an_error() {
        let store = MemoryHashStore::new();

        assert!(!store.hdel("users", "ghost").await.unwrap());
        store.hset("users", "alice", Bytes::from("v1")).await.unwrap();
        assert!(store.hdel("users", "alice").await.unwrap());
        assert!(!store.hdel("users", "alice").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_hsetnx_keeps_existing_value() {
        let store = MemoryHashStore::new();

        assert!(store.hsetnx("users", "alice", Bytes::from("v1")).await.unwrap());
        assert!(!store.hsetnx("users", "alice", Bytes::from("v2")).await.unwrap());
        assert_eq!(
            store.hget("users", "alice").await.unwrap(),
            Some(Bytes::from("v1"))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fenced_delete_checks_index() {
        let store = MemoryHashStore::new();
        store.hset("users", "alice", Bytes::from("v2")).await.unwrap();
        store.hset("mtime", "alice", Bytes::from("2")).await.unwrap();

        // A stale token leaves both entries alone.
        assert!(!store.hdel_fenced("mtime", "users", "alice", b"1").await.unwrap());
        assert_eq!(
            store.hget("users", "alice").await.unwrap(),
            Some(Bytes::from("v2"))
        );

        assert!(store.hdel_fenced("mtime", "users", "alice", b"2").await.unwrap());
        assert_eq!(store.hget("users", "alice").await.unwrap(), None);
        assert_eq!(store.hget("mtime", "alice").await.unwrap(), None);
        assert!(store.is_empty());

        assert!(!store.hdel_fenced("mtime", "users", "alice", b"2").await.unwrap());
    }

    #[tokio::test]
    async fn test_hgetall_spans_shards() {
        let store = MemoryHashStore::new();
        for i in 0..200 {
            store
                .hset("users", &format!("user{}", i), Bytes::from("v"))
                .await
                .unwrap();
        }
        store.hset("other", "x", Bytes::from("v")).await.unwrap();

        let mut entries = store.hgetall("users").await.unwrap();
        entries.sort();
        assert_eq!(entries.len(), 200);
        assert!(store.hgetall("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_flush() {
        let store = MemoryHashStore::new();
        store.hset("users", "a", Bytes::from("1")).await.unwrap();
        store.hget("users", "a").await.unwrap();
        store.hdel("users", "b").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.fields, 1);
        assert_eq!(stats.set_ops, 1);
        assert_eq!(stats.get_ops, 1);
        assert_eq!(stats.del_ops, 1);

        store.flush();
        assert!(store.is_empty());
        assert_eq!(store.hget("users", "a").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let store = Arc::new(MemoryHashStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    let field = format!("key-{}-{}", i, j);
                    store.hset("users", &field, Bytes::from("value")).await.unwrap();
                    store.hget("users", &field).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 1000);
    }
}
