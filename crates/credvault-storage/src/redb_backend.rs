//! Pure-Rust redb storage backend.
//!
//! An alternative to `RocksDB` for environments where a pure-Rust build is
//! required (no C++ FFI). Feature-gated behind `redb-backend`.
//!
//! redb uses a B-tree internally and every operation runs inside a redb
//! transaction, so a batch is simply one write transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::{BatchOp, StorageBackend, StorageError};

/// The single table used for all key-value data.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// A storage backend backed by redb (pure Rust, B-tree based).
///
/// Thread-safe via `Arc<Database>`. Blocking redb calls are offloaded to the
/// Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use credvault_storage::RedbBackend;
/// let backend = RedbBackend::open("/var/lib/credvault/data.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("data: {e}"),
    }
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(txn_error)?;
        {
            let _table = txn.open_table(DATA_TABLE).map_err(table_error)?;
        }
        txn.commit().map_err(txn_error)?;

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

    /// Run `ops` inside one write transaction.
    fn write_ops(db: &Database, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let txn = db.begin_write().map_err(txn_error)?;
        {
            let mut table = txn.open_table(DATA_TABLE).map_err(table_error)?;
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(|e| StorageError::Write {
                                key: key.clone(),
                                reason: e.to_string(),
                            })?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_str()).map_err(|e| StorageError::Delete {
                            key: key.clone(),
                            reason: e.to_string(),
                        })?;
                    }
                }
            }
        }
        // Dropping an uncommitted transaction aborts it.
        txn.commit().map_err(txn_error)
    }

    fn read_prefix(db: &Database, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let list_error = |e: &dyn std::fmt::Display| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        };

        let txn = db.begin_read().map_err(txn_error)?;
        let table = txn.open_table(DATA_TABLE).map_err(table_error)?;

        let mut entries = Vec::new();
        let range = table.range(prefix..).map_err(|e| list_error(&e))?;
        for item in range {
            let (k, v) = item.map_err(|e| list_error(&e))?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_owned(), v.value().to_vec()));
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(txn_error)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_error)?;
            let result = table
                .get(key.as_str())
                .map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .map(|v| v.value().to_vec());
            Ok(result)
        })
        .await
        .map_err(|e| StorageError::Read {
            key: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.apply(vec![BatchOp::put(key, value.to_vec())]).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.apply(vec![BatchOp::delete(key)]).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.scan(prefix).await?;
        Ok(entries.into_iter().map(|(k, _)| k).collect())
    }

    async fn apply(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || Self::write_ops(&db, ops))
            .await
            .map_err(|e| StorageError::Transaction {
                reason: format!("blocking task panicked: {e}"),
            })?
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || Self::read_prefix(&db, &prefix))
            .await
            .map_err(|e| StorageError::List {
                prefix: String::new(),
                reason: format!("blocking task panicked: {e}"),
            })?
    }
}
