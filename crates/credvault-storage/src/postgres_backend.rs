//! `PostgreSQL` storage backend.
//!
//! Stores all key-value data in a single `kv_store` table. Keys are UTF-8
//! strings, values are opaque bytes. Batches run inside one SQL transaction
//! at `SERIALIZABLE` isolation and are rolled back on the first failure.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations without `spawn_blocking`.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::{BatchOp, StorageBackend, StorageError};

/// A storage backend backed by `PostgreSQL`.
///
/// Thread-safe via `PgPool` (connection pool). All operations are fully async.
///
/// # Examples
///
/// ```no_run
/// # use credvault_storage::PostgresBackend;
/// # #[tokio::main]
/// # async fn main() {
/// let backend = PostgresBackend::connect("postgres://localhost/credvault").await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Connect to `PostgreSQL` and run the initial migration.
    ///
    /// Creates the `kv_store` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                path: "[redacted]".to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (\
                key   TEXT  PRIMARY KEY, \
                value BYTEA NOT NULL\
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            path: "[redacted]".to_owned(),
            reason: format!("migration failed: {e}"),
        })?;

        // Prefix index for list/scan.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kv_store_key_prefix \
             ON kv_store (key text_pattern_ops)",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            path: "[redacted]".to_owned(),
            reason: format!("index creation failed: {e}"),
        })?;

        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Escape `LIKE` metacharacters so a prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len().saturating_add(1));
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM kv_store WHERE key LIKE $1 ORDER BY key COLLATE \"C\"")
                .bind(like_prefix(prefix))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::List {
                    prefix: prefix.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn apply(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let txn_error = |e: sqlx::Error| StorageError::Transaction {
            reason: e.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(txn_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(txn_error)?;

        for op in &ops {
            let result = match op {
                BatchOp::Put { key, value } => {
                    sqlx::query(
                        "INSERT INTO kv_store (key, value) VALUES ($1, $2) \
                         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                }
                BatchOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv_store WHERE key = $1")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                }
            };
            // Dropping `tx` without commit rolls the whole batch back.
            result.map_err(|e| StorageError::Transaction {
                reason: format!("batch op on '{}' failed: {e}", op.key()),
            })?;
        }

        tx.commit().await.map_err(txn_error)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT key, value FROM kv_store WHERE key LIKE $1 ORDER BY key COLLATE \"C\"",
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM kv_store WHERE key = $1)")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Read {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(row.is_some_and(|(e,)| e))
    }
}
