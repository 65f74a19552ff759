//! Server configuration for `CredVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `CREDVAULT_*` environment variables.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use credvault_core::DeletePolicy;
use credvault_core::ids::AccountId;

/// Default listener when neither `CREDVAULT_BIND_ADDR` nor `PORT` is set.
const DEFAULT_PORT: u16 = 8300;

/// A setting that is present but unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Path to the audit log file (if file audit is enabled).
    pub audit_file_path: Option<String>,
    /// What deleting a referenced group or service does to its dependents.
    pub delete_policy: DeletePolicy,
    /// Accounts allowed to perform every operation.
    pub superusers: BTreeSet<AccountId>,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
    /// Redb persistent storage.
    Redb { path: String },
    /// PostgreSQL persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on, on all interfaces
    /// - `CREDVAULT_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `CREDVAULT_STORAGE`: `memory`, `rocksdb`, `redb`, or `postgres` (default: `memory`)
    /// - `CREDVAULT_STORAGE_PATH`: path for persistent backends (default: `./data`)
    /// - `DATABASE_URL`: PostgreSQL connection string (used when `CREDVAULT_STORAGE=postgres`)
    /// - `CREDVAULT_LOG_LEVEL`: log filter (default: `info`)
    /// - `CREDVAULT_AUDIT_FILE`: path to audit log file (optional)
    /// - `CREDVAULT_DELETE_POLICY`: `cascade` or `restrict` (default: `cascade`)
    /// - `CREDVAULT_SUPERUSERS`: comma-separated account ids (default: none)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the delete policy or a
    /// superuser id cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Priority: CREDVAULT_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = var("CREDVAULT_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port_str) = var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(DEFAULT_PORT);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_path = var("CREDVAULT_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned());

        let storage_backend = match var("CREDVAULT_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            "redb" => StorageBackendType::Redb { path: storage_path },
            "postgres" | "postgresql" => {
                let url = var("DATABASE_URL")
                    .unwrap_or_else(|| "postgres://localhost/credvault".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = var("CREDVAULT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let audit_file_path = var("CREDVAULT_AUDIT_FILE").filter(|p| !p.trim().is_empty());

        let delete_policy = match var("CREDVAULT_DELETE_POLICY") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                var: "CREDVAULT_DELETE_POLICY",
                reason,
            })?,
            None => DeletePolicy::default(),
        };

        let superusers = var("CREDVAULT_SUPERUSERS")
            .as_deref()
            .map(parse_superusers)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            storage_backend,
            log_level,
            audit_file_path,
            delete_policy,
            superusers,
        })
    }
}

fn parse_superusers(raw: &str) -> Result<BTreeSet<AccountId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e| ConfigError::Invalid {
                var: "CREDVAULT_SUPERUSERS",
                reason: format!("'{s}' is not an account id: {e}"),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8300)));
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.delete_policy, DeletePolicy::Cascade);
        assert!(config.superusers.is_empty());
        assert!(config.audit_file_path.is_none());
    }

    #[test]
    fn bind_addr_beats_port() {
        let config = load(&[("CREDVAULT_BIND_ADDR", "0.0.0.0:9000"), ("PORT", "7000")]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));

        let config = load(&[("PORT", "7000")]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 7000)));
    }

    #[test]
    fn persistent_backends_take_the_storage_path() {
        let config = load(&[
            ("CREDVAULT_STORAGE", "RocksDB"),
            ("CREDVAULT_STORAGE_PATH", "/var/lib/credvault"),
        ])
        .unwrap();
        assert_eq!(
            config.storage_backend,
            StorageBackendType::RocksDb {
                path: "/var/lib/credvault".to_owned()
            }
        );

        let config = load(&[
            ("CREDVAULT_STORAGE", "postgres"),
            ("DATABASE_URL", "postgres://db/vault"),
        ])
        .unwrap();
        assert_eq!(
            config.storage_backend,
            StorageBackendType::Postgres {
                url: "postgres://db/vault".to_owned()
            }
        );
    }

    #[test]
    fn superusers_are_parsed() {
        let a = AccountId::generate();
        let b = AccountId::generate();
        let config = load(&[("CREDVAULT_SUPERUSERS", &format!(" {a}, {b},"))]).unwrap();
        assert_eq!(config.superusers, BTreeSet::from([a, b]));
    }

    #[test]
    fn bad_superuser_is_rejected() {
        let err = load(&[("CREDVAULT_SUPERUSERS", "root")]).unwrap_err();
        assert!(err.to_string().contains("CREDVAULT_SUPERUSERS"));
    }

    #[test]
    fn delete_policy_is_strict() {
        let config = load(&[("CREDVAULT_DELETE_POLICY", "restrict")]).unwrap();
        assert_eq!(config.delete_policy, DeletePolicy::Restrict);
        assert!(load(&[("CREDVAULT_DELETE_POLICY", "soft")]).is_err());
    }
}
