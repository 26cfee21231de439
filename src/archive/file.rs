//! File-per-snapshot archive.
//!
//! Snapshots land in `<dir>/<key>_<token>.json`. Each one is written and
//! synced to a staging file first, then hard-linked into place. The link
//! fails if the target exists, so archiving the same `(key, token)` twice
//! fails instead of overwriting the first copy, and an archive interrupted
//! midway never leaves a truncated snapshot under the final name.

use crate::archive::PersistenceSink;
use crate::error::{Result, StoreError};
use crate::token::ModificationToken;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Archives into `dir`, which is created on first use if missing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the snapshot for `(key, token)` is written.
    pub fn snapshot_path(&self, key: &str, token: ModificationToken) -> PathBuf {
        self.dir.join(format!("{}_{}.json", sanitize(key), token))
    }

    fn staging_path(path: &Path) -> PathBuf {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        path.with_file_name(format!(".{}.tmp", name))
    }

    async fn write_snapshot(&self, path: &Path, value: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let staging = Self::staging_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)
            .await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        let linked = fs::hard_link(&staging, path).await;
        let _ = fs::remove_file(&staging).await;
        linked
    }
}

/// Keeps keys from escaping the archive directory.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl PersistenceSink for FileSink {
    async fn archive(&self, key: &str, token: ModificationToken, value: Bytes) -> Result<()> {
        let path = self.snapshot_path(key, token);

        self.write_snapshot(&path, &value)
            .await
            .map_err(|source| StoreError::Archive {
                key: key.to_string(),
                token,
                source,
            })?;

        debug!(key = %key, token = %token, path = %path.display(), "Snapshot archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_writes_one_file_per_token() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("userapidata"));
        let t1 = ModificationToken::from_nanos(1);
        let t2 = ModificationToken::from_nanos(2);

        sink.archive("alice", t1, Bytes::from("v1")).await.unwrap();
        sink.archive("alice", t2, Bytes::from("v2")).await.unwrap();

        let first = std::fs::read(sink.snapshot_path("alice", t1)).unwrap();
        let second = std::fs::read(sink.snapshot_path("alice", t2)).unwrap();
        assert_eq!(first, b"v1");
        assert_eq!(second, b"v2");
    }

    #[tokio::test]
    async fn test_archive_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let token = ModificationToken::from_nanos(7);

        sink.archive("bob", token, Bytes::from("original")).await.unwrap();
        let err = sink
            .archive("bob", token, Bytes::from("clobber"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Archive { .. }));

        assert!(err.is_already_archived());

        let kept = std::fs::read(sink.snapshot_path("bob", token)).unwrap();
        assert_eq!(kept, b"original");
    }

    #[tokio::test]
    async fn test_leftover_staging_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let token = ModificationToken::from_nanos(9);
        let path = sink.snapshot_path("erin", token);

        // What an interrupted archive leaves behind
        std::fs::write(FileSink::staging_path(&path), b"{\"user").unwrap();

        sink.archive("erin", token, Bytes::from("complete")).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"complete");
        assert!(!FileSink::staging_path(&path).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_archive_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let sink = FileSink::new(&blocker);
        let err = sink
            .archive("carol", ModificationToken::from_nanos(1), Bytes::from("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Archive { ref key, .. } if key == "carol"));
    }

    #[test]
    fn test_key_cannot_escape_dir() {
        let sink = FileSink::new("/opt/userapidata");
        let path = sink.snapshot_path("../../etc/passwd", ModificationToken::from_nanos(3));
        assert_eq!(path.parent(), Some(Path::new("/opt/userapidata")));
        assert_eq!(sanitize("billy2000"), "billy2000");
    }
}
