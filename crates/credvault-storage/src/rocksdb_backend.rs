//! `RocksDB` storage backend, the production default.
//!
//! Wraps the `rocksdb` crate behind the [`StorageBackend`] trait. All
//! operations are dispatched to a blocking thread via
//! [`tokio::task::spawn_blocking`] since `RocksDB` is a synchronous C++ library.
//!
//! Batches map onto a `WriteBatch`, which `RocksDB` commits atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::{BatchOp, StorageBackend, StorageError};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// Thread-safe (`Arc<DB>` internally) and safe to share across async tasks.
/// All blocking `RocksDB` calls are offloaded to the Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use credvault_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/credvault/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path.
    ///
    /// Creates the database directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open or create the
    /// database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Collect the keys under `prefix` without copying their values.
fn collect_prefix_keys(db: &Db, prefix: &str) -> Result<Vec<String>, StorageError> {
    let mut iter = db.raw_iterator();
    iter.seek(prefix.as_bytes());

    let mut keys = Vec::new();
    while let Some(k) = iter.key() {
        let key = std::str::from_utf8(k).map_err(|e| StorageError::InvalidKey {
            reason: e.to_string(),
        })?;
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_owned());
        iter.next();
    }
    iter.status().map_err(|e| StorageError::List {
        prefix: prefix.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(keys)
}

/// Collect `(key, value)` pairs under `prefix` from a forward iterator.
fn collect_prefix(db: &Db, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
    let iter = db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

    let mut entries = Vec::new();
    for item in iter {
        let (k, v) = item.map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;
        let key = String::from_utf8(k.to_vec()).map_err(|e| StorageError::InvalidKey {
            reason: e.to_string(),
        })?;
        if !key.starts_with(prefix) {
            break;
        }
        entries.push((key, v.to_vec()));
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            db.get(key.as_bytes()).map_err(|e| StorageError::Read {
                key,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| StorageError::Read {
            key: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            db.put(key.as_bytes(), &value)
                .map_err(|e| StorageError::Write {
                    key,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| StorageError::Write {
            key: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            db.delete(key.as_bytes()).map_err(|e| StorageError::Delete {
                key,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| StorageError::Delete {
            key: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || collect_prefix_keys(&db, &prefix))
            .await
            .map_err(|e| StorageError::List {
                prefix: String::new(),
                reason: format!("blocking task panicked: {e}"),
            })?
    }

    async fn apply(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let size = ops.len();
            let mut batch = WriteBatch::default();
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => batch.put(key.as_bytes(), &value),
                    BatchOp::Delete { key } => batch.delete(key.as_bytes()),
                }
            }
            db.write(batch).map_err(|e| StorageError::Transaction {
                reason: format!("write batch of {size} ops failed: {e}"),
            })
        })
        .await
        .map_err(|e| StorageError::Transaction {
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || collect_prefix(&db, &prefix))
            .await
            .map_err(|e| StorageError::List {
                prefix: String::new(),
                reason: format!("blocking task panicked: {e}"),
            })?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksDbBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksDbBackend::open(dir.path()).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn list_stops_at_the_prefix_boundary() {
        let (_dir, backend) = open_temp();
        backend
            .apply(vec![
                BatchOp::put("index/group_grants/ops/db1", b"".to_vec()),
                BatchOp::put("index/group_grants/ops/db2", b"".to_vec()),
                BatchOp::put("index/group_grants/opsx/db3", b"".to_vec()),
                BatchOp::put("index/group_grants/sre/db1", b"".to_vec()),
            ])
            .await
            .unwrap();

        let keys = backend.list("index/group_grants/ops/").await.unwrap();
        assert_eq!(
            keys,
            ["index/group_grants/ops/db1", "index/group_grants/ops/db2"]
        );
        assert!(backend.list("grants/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_returns_values_in_key_order() {
        let (_dir, backend) = open_temp();
        backend.put("groups/b", b"{\"n\":2}").await.unwrap();
        backend.put("groups/a", b"{\"n\":1}").await.unwrap();
        backend.put("services/a", b"{}").await.unwrap();

        let rows = backend.scan("groups/").await.unwrap();
        assert_eq!(
            rows,
            [
                ("groups/a".to_owned(), b"{\"n\":1}".to_vec()),
                ("groups/b".to_owned(), b"{\"n\":2}".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn apply_commits_puts_and_deletes_together() {
        let (_dir, backend) = open_temp();
        backend.put("memberships/ops/alice", b"wrap1").await.unwrap();

        backend
            .apply(vec![
                BatchOp::delete("memberships/ops/alice"),
                BatchOp::put("memberships/ops/bob", b"wrap2".to_vec()),
            ])
            .await
            .unwrap();

        assert_eq!(backend.get("memberships/ops/alice").await.unwrap(), None);
        assert_eq!(
            backend.get("memberships/ops/bob").await.unwrap(),
            Some(b"wrap2".to_vec())
        );
    }
}
