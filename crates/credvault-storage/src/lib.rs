//! Storage backend abstraction for `CredVault`.
//!
//! This crate defines the [`StorageBackend`] trait: a key-value storage
//! interface that knows nothing about accounts, groups, or services. The
//! ledgers in `credvault-core` lay their records out on top of it as JSON
//! documents and index keys.
//!
//! Every multi-key mutation goes through [`StorageBackend::apply`], which
//! commits a batch of puts and deletes all-or-nothing.
//!
//! Four implementations are provided:
//!
//! - [`RocksDbBackend`]: production default, backed by `RocksDB` (feature `rocksdb-backend`)
//! - [`RedbBackend`]: pure-Rust alternative, backed by redb (feature `redb-backend`)
//! - [`PostgresBackend`]: a single table in `PostgreSQL` (feature `postgres-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and development

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;
#[cfg(feature = "redb-backend")]
mod redb_backend;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key`, overwriting any existing value.
    Put { key: String, value: Vec<u8> },
    /// Remove `key`. Removing a missing key is not an error.
    Delete { key: String },
}

impl BatchOp {
    /// Shorthand for [`BatchOp::Put`].
    #[must_use]
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Shorthand for [`BatchOp::Delete`].
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `accounts/<id>`,
/// `memberships/<group>/<account>`). Values are opaque byte arrays.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. This is idempotent: deleting a non-existent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply a batch of puts and deletes atomically.
    ///
    /// Either every operation in `ops` becomes visible or none does. Readers
    /// never observe a partially applied batch. Operations apply in order, so
    /// a later op on the same key wins.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the batch could not be
    /// committed. In that case storage is unchanged.
    async fn apply(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;

    /// Return every key-value pair under `prefix`, in ascending key order.
    ///
    /// The default implementation lists keys and fetches each one; keys that
    /// disappear between the two steps are skipped. Backends may override
    /// this with a single consistent read.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] or [`StorageError::Read`] if the
    /// underlying backend fails.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let keys = self.list(prefix).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
