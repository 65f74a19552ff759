//! Error types for `credvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. No variant ever carries a wrapped-key blob or secret
//! ciphertext, only identifiers and counts.

use credvault_storage::StorageError;

use crate::ids::{AccountId, GroupId, ServiceId};

/// Errors from audit operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// All audit backends failed to write, so the mutation is refused.
    #[error("all audit backends failed (fail-closed)")]
    AllBackendsFailed,

    /// A specific audit backend failed.
    #[error("audit backend '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// Serialization of the audit entry failed.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors from vault graph operations.
///
/// Every variant is a local, recoverable condition. A mutation that returns
/// an error has left storage exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A referenced account, group, customer, service group, service,
    /// membership, or grant does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The account is already a member of the group.
    #[error("account {account} is already a member of group {group}")]
    DuplicateMembership { account: AccountId, group: GroupId },

    /// The group already holds a grant on the service.
    #[error("group {group} already has access to service {service}")]
    DuplicateGrant { group: GroupId, service: ServiceId },

    /// A public key change was attempted while wrapped blobs depend on it.
    #[error(
        "cannot change public key of {entity} {id}: {dependents} wrapped key(s) depend on it, rotate instead"
    )]
    KeyRotationConflict {
        entity: &'static str,
        id: String,
        dependents: usize,
    },

    /// The group is still referenced and cascading deletes are disabled.
    #[error("group {group} is in use by {memberships} membership(s) and {grants} grant(s)")]
    GroupInUse {
        group: GroupId,
        memberships: usize,
        grants: usize,
    },

    /// The service is still referenced and cascading deletes are disabled.
    #[error("service {service} is in use by {grants} grant(s)")]
    ServiceInUse { service: ServiceId, grants: usize },

    /// A rotation could not be applied as a whole; nothing was changed.
    #[error("rotation rejected, no keys were replaced: {reason}")]
    PartialRotationFailure { reason: String },

    /// A uniqueness constraint other than membership/grant was violated.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Input failed boundary validation.
    #[error("invalid request: {reason}")]
    Invalid { reason: String },

    /// A stored record could not be encoded or decoded.
    #[error("record serialization failed for '{key}': {reason}")]
    Serialization { key: String, reason: String },

    /// The audit trail refused the entry, so the mutation was not applied.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// The underlying storage backend returned an error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl VaultError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn partial_rotation(reason: impl Into<String>) -> Self {
        Self::PartialRotationFailure {
            reason: reason.into(),
        }
    }
}
