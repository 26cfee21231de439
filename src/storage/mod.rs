//! Storage Module
//!
//! The store is a set of named hash collections, each mapping a field (the
//! record key, a username) to an opaque value. Two collections matter to the
//! eviction protocol:
//!
//! - `users`: the records themselves
//! - `modified_user_time`: the modification token of each record's latest write
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ RecordStore  get/set/delete + *_index       │
//! │              set_if_absent, delete_fenced   │
//! └─────────────────────┬───────────────────────┘
//!                       │ Arc<dyn HashStore>
//!          ┌────────────┴─────────────┐
//!          ▼                          ▼
//! ┌──────────────────┐      ┌───────────────────┐
//! │ MemoryHashStore  │      │  RedisHashStore   │
//! │ (sharded RwLock) │      │ (HGET/HSET/HDEL,  │
//! │                  │      │  Lua for fencing) │
//! └──────────────────┘      └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use fencekv::storage::{MemoryHashStore, RecordStore};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = RecordStore::new(Arc::new(MemoryHashStore::new()));
//! store.set("alice", Bytes::from("v1")).await.unwrap();
//! assert_eq!(store.get("alice").await.unwrap(), Bytes::from("v1"));
//! # });
//! ```

pub mod memory;
pub mod record;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use memory::{MemoryHashStore, StorageStats};
pub use record::{RecordStore, INDEX_COLLECTION, RECORD_COLLECTION};
pub use self::redis::RedisHashStore;

/// Field-level access to named hash collections.
///
/// Absence is not an error at this layer: `hget` returns `None` and `hdel`
/// returns `false`.
#[async_trait]
pub trait HashStore: Send + Sync + 'static {
    async fn hget(&self, collection: &str, field: &str) -> Result<Option<Bytes>>;

    /// Unconditional overwrite.
    async fn hset(&self, collection: &str, field: &str, value: Bytes) -> Result<()>;

    /// Sets the field only if it is absent. Returns true if it was set.
    async fn hsetnx(&self, collection: &str, field: &str, value: Bytes) -> Result<bool>;

    /// Returns true if the field existed.
    async fn hdel(&self, collection: &str, field: &str) -> Result<bool>;

    /// All fields of a collection, in no particular order.
    async fn hgetall(&self, collection: &str) -> Result<Vec<(String, Bytes)>>;

    /// Atomically removes `field` from both `index` and `records`, but only
    /// while `index` still maps it to `expected`. Returns true if it did.
    async fn hdel_fenced(
        &self,
        index: &str,
        records: &str,
        field: &str,
        expected: &[u8],
    ) -> Result<bool>;
}
