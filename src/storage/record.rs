//! Record and token-index access.
//!
//! [`RecordStore`] is the view of the hash store the coordinator works with:
//! records in one collection, each record's latest modification token in a
//! parallel index collection. Tokens are stored as decimal strings so the
//! index stays readable from `redis-cli`.

use crate::error::{Result, StoreError};
use crate::storage::HashStore;
use crate::token::ModificationToken;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Collection holding the records.
pub const RECORD_COLLECTION: &str = "users";

/// Collection mapping each record key to its latest modification token.
pub const INDEX_COLLECTION: &str = "modified_user_time";

#[derive(Clone)]
pub struct RecordStore {
    hash: Arc<dyn HashStore>,
    records: String,
    index: String,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("records", &self.records)
            .field("index", &self.index)
            .finish()
    }
}

impl RecordStore {
    /// A record store over the default `users` / `modified_user_time` collections.
    pub fn new(hash: Arc<dyn HashStore>) -> Self {
        Self::with_collections(hash, RECORD_COLLECTION, INDEX_COLLECTION)
    }

    pub fn with_collections(
        hash: Arc<dyn HashStore>,
        records: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            hash,
            records: records.into(),
            index: index.into(),
        }
    }

    /// Returns the record, or `NotFound`.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        self.hash
            .hget(&self.records, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.hash.hset(&self.records, key, value).await
    }

    /// Stores the record only if there is none. Returns true if it did.
    pub async fn set_if_absent(&self, key: &str, value: Bytes) -> Result<bool> {
        self.hash.hsetnx(&self.records, key, value).await
    }

    /// Removes the record; returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.hash.hdel(&self.records, key).await
    }

    /// The token of the latest write to `key`, if the index has one.
    pub async fn get_index(&self, key: &str) -> Result<Option<ModificationToken>> {
        match self.hash.hget(&self.index, key).await? {
            Some(raw) => parse_token(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn set_index(&self, key: &str, token: ModificationToken) -> Result<()> {
        self.hash
            .hset(&self.index, key, Bytes::from(token.to_string()))
            .await
    }

    pub async fn delete_index(&self, key: &str) -> Result<bool> {
        self.hash.hdel(&self.index, key).await
    }

    /// Removes the record and its index entry in one step, only while the
    /// index still holds `token`. Returns false when a newer write (or a
    /// delete) has moved the index on, leaving everything as it is.
    pub async fn delete_fenced(&self, key: &str, token: ModificationToken) -> Result<bool> {
        self.hash
            .hdel_fenced(&self.index, &self.records, key, token.to_string().as_bytes())
            .await
    }

    /// Every `(key, token)` in the index. Unparseable entries are skipped.
    pub async fn index_entries(&self) -> Result<Vec<(String, ModificationToken)>> {
        let entries = self.hash.hgetall(&self.index).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, raw)| match parse_token(&key, &raw) {
                Ok(token) => Some((key, token)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupt index entry");
                    None
                }
            })
            .collect())
    }
}

fn parse_token(key: &str, raw: &[u8]) -> Result<ModificationToken> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::CorruptToken {
            key: key.to_string(),
            value: String::from_utf8_lossy(raw).into_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryHashStore;

    fn store() -> (Arc<MemoryHashStore>, RecordStore) {
        let hash = Arc::new(MemoryHashStore::new());
        let store = RecordStore::new(hash.clone());
        (hash, store)
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_, store) = store();
        let err = store.get("alice").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_index_round_trip() {
        let (hash, store) = store();
        let token = ModificationToken::from_nanos(1_700_000_000_000_000_001);

        assert_eq!(store.get_index("alice").await.unwrap(), None);
        store.set_index("alice", token).await.unwrap();
        assert_eq!(store.get_index("alice").await.unwrap(), Some(token));
        assert_eq!(
            hash.hget(INDEX_COLLECTION, "alice").await.unwrap(),
            Some(Bytes::from("1700000000000000001"))
        );

        assert!(store.delete_index("alice").await.unwrap());
        assert_eq!(store.get_index("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_fenced_spares_newer_write() {
        let (_, store) = store();
        let t1 = ModificationToken::from_nanos(1);
        let t2 = ModificationToken::from_nanos(2);

        store.set_index("alice", t2).await.unwrap();
        store.set("alice", Bytes::from("v2")).await.unwrap();

        assert!(!store.delete_fenced("alice", t1).await.unwrap());
        assert_eq!(store.get("alice").await.unwrap(), Bytes::from("v2"));
        assert_eq!(store.get_index("alice").await.unwrap(), Some(t2));

        assert!(store.delete_fenced("alice", t2).await.unwrap());
        assert!(store.get("alice").await.unwrap_err().is_not_found());
        assert_eq!(store.get_index("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let (_, store) = store();

        assert!(store.set_if_absent("alice", Bytes::from("v1")).await.unwrap());
        assert!(!store.set_if_absent("alice", Bytes::from("v2")).await.unwrap());
        assert_eq!(store.get("alice").await.unwrap(), Bytes::from("v1"));
    }

    #[tokio::test]
    async fn test_corrupt_index_entry() {
        let (hash, store) = store();
        hash.hset(INDEX_COLLECTION, "alice", Bytes::from("yesterday"))
            .await
            .unwrap();
        hash.hset(INDEX_COLLECTION, "bob", Bytes::from("42"))
            .await
            .unwrap();

        assert!(matches!(
            store.get_index("alice").await,
            Err(StoreError::CorruptToken { .. })
        ));

        let entries = store.index_entries().await.unwrap();
        assert_eq!(
            entries,
            vec![("bob".to_string(), ModificationToken::from_nanos(42))]
        );
    }

    #[tokio::test]
    async fn test_custom_collections() {
        let hash = Arc::new(MemoryHashStore::new());
        let store = RecordStore::with_collections(hash.clone(), "sessions", "sessions_mtime");

        store.set("s1", Bytes::from("data")).await.unwrap();
        assert_eq!(
            hash.hget("sessions", "s1").await.unwrap(),
            Some(Bytes::from("data"))
        );
        assert_eq!(hash.hget(RECORD_COLLECTION, "s1").await.unwrap(), None);
    }
}
