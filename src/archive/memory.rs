//! In-memory archive.

use crate::archive::PersistenceSink;
use crate::error::{Result, StoreError};
use crate::token::ModificationToken;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One archived record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub key: String,
    pub token: ModificationToken,
    pub value: Bytes,
}

/// Keeps every snapshot in memory, in archive order.
///
/// Can be switched into a failing mode to exercise archive-failure handling.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<Snapshot>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `archive` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Snapshots archived for `key`.
    pub fn snapshots_for(&self, key: &str) -> Vec<Snapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn archive(&self, key: &str, token: ModificationToken, value: Bytes) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Archive {
                key: key.to_string(),
                token,
                source: std::io::Error::other("sink unavailable"),
            });
        }

        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots.iter().any(|s| s.key == key && s.token == token) {
            return Err(StoreError::Archive {
                key: key.to_string(),
                token,
                source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            });
        }
        snapshots.push(Snapshot {
            key: key.to_string(),
            token,
            value,
        });
        Ok(())
    }
}
