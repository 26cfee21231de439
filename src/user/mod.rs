//! User Records
//!
//! The user API sits on top of the expiry coordinator: creating or editing a
//! user is a write (and restarts its TTL), and every user disappears one TTL
//! after its last change, archived on the way out.

pub mod validation;

use crate::coordinator::{ExpiryCoordinator, ExpirySnapshot};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use validation::{parse_user, validate_edit, validate_user, Address, User, ValidationError};

/// Storage for user documents, keyed by lower-cased username.
#[async_trait]
pub trait UserDatabase: Send + Sync + 'static {
    /// Stores a new user, or fails with `AlreadyExists`. Two concurrent
    /// creates for the same name never both succeed.
    async fn create_user(&self, username: &str, document: Bytes) -> Result<()>;

    async fn set_user(&self, username: &str, document: Bytes) -> Result<()>;

    /// Returns the document, or `NotFound`.
    async fn get_user(&self, username: &str) -> Result<Bytes>;

    /// Removes the user, or fails with `NotFound`.
    async fn delete_user(&self, username: &str) -> Result<()>;

    /// Eviction counters, for backends that expire users.
    fn expiry_stats(&self) -> Option<ExpirySnapshot> {
        None
    }
}

#[async_trait]
impl UserDatabase for ExpiryCoordinator {
    async fn create_user(&self, username: &str, document: Bytes) -> Result<()> {
        self.create(username, document).await.map(|_| ())
    }

    async fn set_user(&self, username: &str, document: Bytes) -> Result<()> {
        self.write(username, document).await.map(|_| ())
    }

    async fn get_user(&self, username: &str) -> Result<Bytes> {
        self.read(username).await
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        self.delete(username).await
    }

    fn expiry_stats(&self) -> Option<ExpirySnapshot> {
        Some(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemorySink;
    use crate::coordinator::ExpiryConfig;
    use crate::lock::MemoryLockService;
    use crate::storage::{MemoryHashStore, RecordStore};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_coordinator_as_user_database() {
        let coordinator = ExpiryCoordinator::new(
            RecordStore::new(Arc::new(MemoryHashStore::new())),
            Arc::new(MemoryLockService::new()),
            Arc::new(MemorySink::new()),
            ExpiryConfig {
                ttl: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let db: Arc<dyn UserDatabase> = Arc::new(coordinator);

        db.create_user("bobman12", Bytes::from(r#"{"username":"bobman12"}"#))
            .await
            .unwrap();
        assert!(db
            .create_user("bobman12", Bytes::from("{}"))
            .await
            .unwrap_err()
            .is_already_exists());
        assert_eq!(
            db.get_user("bobman12").await.unwrap(),
            Bytes::from(r#"{"username":"bobman12"}"#)
        );

        db.set_user("bobman12", Bytes::from(r#"{"username":"bobman12","v":2}"#))
            .await
            .unwrap();
        assert_eq!(db.expiry_stats().map(|s| s.writes), Some(2));

        db.delete_user("bobman12").await.unwrap();
        assert!(db.get_user("bobman12").await.unwrap_err().is_not_found());
        assert!(db.delete_user("bobman12").await.unwrap_err().is_not_found());
    }
}
