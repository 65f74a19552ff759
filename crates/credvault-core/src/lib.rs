//! Core library for `CredVault`.
//!
//! Holds the account/group/service graph of a shared credential vault: the
//! identity registry, group directory, membership and grant ledgers, the
//! asset hierarchy, the access resolver, and the audit trail. Every key and
//! secret stored here is ciphertext produced by clients; this crate keeps it
//! verbatim and maintains who can reach what. It depends on
//! `credvault-storage` for the storage backend trait.

pub mod assets;
pub mod audit;
pub mod audit_file;
mod cascade;
pub mod error;
pub mod grants;
pub mod groups;
pub mod identity;
pub mod ids;
pub mod membership;
pub mod metadata;
pub mod model;
pub mod resolver;
pub mod rotation;
mod store;
pub mod vault;

pub use error::{AuditError, VaultError};
pub use vault::{DeletePolicy, Vault, VaultConfig};
