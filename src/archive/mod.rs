//! Persistence Sink
//!
//! Before an expired record is deleted, its content is archived once under
//! `(key, token)`. Different tokens for the same key never collide, and the
//! eviction protocol guarantees at most one call per token.
//!
//! - [`FileSink`]: one file per snapshot in a directory
//! - [`MemorySink`]: snapshots kept in memory

pub mod file;
pub mod memory;

use crate::error::Result;
use crate::token::ModificationToken;
use async_trait::async_trait;
use bytes::Bytes;

pub use file::FileSink;
pub use memory::{MemorySink, Snapshot};

#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    /// Durably stores `value` as the final content of `key` at `token`.
    async fn archive(&self, key: &str, token: ModificationToken, value: Bytes) -> Result<()>;
}
