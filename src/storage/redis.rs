//! Redis-backed hash store (`HGET` / `HSET` / `HSETNX` / `HDEL` / `HGETALL`).
//!
//! The fenced delete runs as a Lua script so the token check and both
//! removals happen in one step on the server.

use crate::error::Result;
use crate::storage::HashStore;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

pub(crate) const FENCED_DELETE_SCRIPT: &str = r#"if redis.call("hget", KEYS[1], ARGV[1]) == ARGV[2] then redis.call("hdel", KEYS[2], ARGV[1]) return redis.call("hdel", KEYS[1], ARGV[1]) else return 0 end"#;

#[derive(Clone)]
pub struct RedisHashStore {
    conn: ConnectionManager,
    fenced_delete: Script,
}

impl std::fmt::Debug for RedisHashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHashStore").finish_non_exhaustive()
    }
}

impl RedisHashStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            fenced_delete: Script::new(FENCED_DELETE_SCRIPT),
        }
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn hget(&self, collection: &str, field: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.hget(collection, field).await?;
        Ok(value.map(Bytes::from))
    }

    async fn hset(&self, collection: &str, field: &str, value: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(collection, field, &value[..]).await?;
        Ok(())
    }

    async fn hsetnx(&self, collection: &str, field: &str, value: Bytes) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn.hset_nx(collection, field, &value[..]).await?;
        Ok(set)
    }

    async fn hdel(&self, collection: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(collection, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, collection: &str) -> Result<Vec<(String, Bytes)>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, Vec<u8>> = conn.hgetall(collection).await?;
        Ok(entries
            .into_iter()
            .map(|(field, value)| (field, Bytes::from(value)))
            .collect())
    }

    async fn hdel_fenced(
        &self,
        index: &str,
        records: &str,
        field: &str,
        expected: &[u8],
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .fenced_delete
            .key(index)
            .key(records)
            .arg(field)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
