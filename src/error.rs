//! Error Types
//!
//! All store, lock and sink operations return [`StoreError`]. The variants
//! follow the failure taxonomy of the eviction protocol:
//!
//! - `NotFound`: the key is absent on read/delete. Returned, never retried.
//! - `AlreadyExists`: a create found a record under the key.
//! - `Contention`: a lock could not be obtained within the retry policy.
//! - `LockNotHeld`: a lease expired (or was taken over) before release.
//! - `Transport`: the remote store or lock service failed.
//! - `Archive`: the persistence sink could not write a snapshot.
//! - `CorruptToken`: the token index holds something that isn't a token.

use crate::token::ModificationToken;
use redis::RedisError;
use std::io::ErrorKind;
use thiserror::Error;

/// Errors surfaced by the store, lock service, sink and coordinator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist
    #[error("key not found: {0}")]
    NotFound(String),

    /// A create found an existing record
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// The lock for a resource is held by someone else
    #[error("lock contention on '{resource}'")]
    Contention { resource: String },

    /// Release was attempted on a lease that is no longer ours
    #[error("lock on '{resource}' is no longer held")]
    LockNotHeld { resource: String },

    /// The remote store or lock service is unreachable or erroring
    #[error("transport failure: {0}")]
    Transport(#[from] RedisError),

    /// The persistence sink failed to write a snapshot
    #[error("failed to archive '{key}' at token {token}: {source}")]
    Archive {
        key: String,
        token: ModificationToken,
        #[source]
        source: std::io::Error,
    },

    /// The modification-token index holds an unparseable value
    #[error("corrupt modification token for '{key}': {value:?}")]
    CorruptToken { key: String, value: String },
}

impl StoreError {
    /// Returns true if this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Returns true if the sink already holds a snapshot for this key and
    /// token, i.e. an earlier attempt got as far as archiving.
    pub fn is_already_archived(&self) -> bool {
        matches!(self, StoreError::Archive { source, .. } if source.kind() == ErrorKind::AlreadyExists)
    }

    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Contention { .. } | StoreError::LockNotHeld { .. } | StoreError::Transport(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
