//! Audit trail for security-relevant graph changes.
//!
//! Destroying a membership or grant, rotating a key, and deleting any entity
//! are privileged actions. Each one writes an audit entry BEFORE the storage
//! batch commits. If backends are configured and all of them fail to write,
//! the mutation is refused (fail-closed).
//!
//! Entries carry identifiers and counts only. Wrapped keys and secret
//! ciphertext never reach the audit log.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::AuditError;
use crate::ids::AccountId;

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Actor {
    /// An authenticated account, as established by the caller layer.
    Account(AccountId),
    /// The server itself (bootstrap, maintenance).
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

/// The audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    GrantMembership,
    RevokeMembership,
    SetMembershipAdmin,
    RotateGroupKey,
    RotateAccountKey,
    GrantAccess,
    RevokeAccess,
    RotateServiceKey,
    DeleteAccount,
    DeleteGroup,
    DeleteCustomer,
    DeleteServiceGroup,
    DeleteService,
}

/// Whether the entry records an attempt or a failed commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Written before the batch commits.
    Requested,
    /// Written after the batch failed to commit; nothing changed.
    Failed,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: AuditAction,
    /// The primary resource, e.g. `groups/<id>`.
    pub resource: String,
    pub outcome: AuditOutcome,
    /// Identifiers and counts describing the change.
    pub detail: serde_json::Value,
}

impl AuditEntry {
    /// A fresh `Requested` entry.
    #[must_use]
    pub fn new(
        actor: Actor,
        action: AuditAction,
        resource: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor,
            action,
            resource: resource.into(),
            outcome: AuditOutcome::Requested,
            detail,
        }
    }

    /// The same event, marked as failed.
    #[must_use]
    pub fn failed(&self, reason: &str) -> Self {
        let mut entry = self.clone();
        entry.id = uuid::Uuid::new_v4().to_string();
        entry.timestamp = Utc::now();
        entry.outcome = AuditOutcome::Failed;
        entry.detail = serde_json::json!({
            "request_id": self.id,
            "reason": reason,
        });
        entry
    }
}

/// Trait for audit log backends.
///
/// Implementations must be safe to share across async tasks.
#[async_trait::async_trait]
pub trait AuditBackend: Send + Sync {
    /// The backend's name (for error reporting).
    fn name(&self) -> &str;

    /// Write an audit entry. Must not silently drop entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be persisted.
    async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Manages multiple audit backends with fail-closed semantics.
///
/// If at least one backend succeeds, the mutation proceeds. If ALL fail,
/// the mutation is refused.
#[derive(Default)]
pub struct AuditManager {
    backends: RwLock<Vec<Arc<dyn AuditBackend>>>,
}

impl AuditManager {
    /// Create an audit manager with no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an audit backend.
    pub async fn add_backend(&self, backend: Arc<dyn AuditBackend>) {
        self.backends.write().await.push(backend);
    }

    /// Log an audit entry to all backends.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::AllBackendsFailed`] if every backend fails.
    pub async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let backends = self.backends.read().await;

        if backends.is_empty() {
            return Ok(());
        }

        let mut any_success = false;
        for backend in backends.iter() {
            match backend.log(entry).await {
                Ok(()) => any_success = true,
                Err(e) => {
                    warn!(
                        backend = backend.name(),
                        error = %e,
                        "audit backend failed"
                    );
                }
            }
        }

        if any_success {
            Ok(())
        } else {
            Err(AuditError::AllBackendsFailed)
        }
    }

    /// Record that a previously logged request failed to commit.
    ///
    /// Best effort: the mutation already failed, so a logging failure here
    /// is only reported through `tracing`.
    pub async fn log_failure(&self, entry: &AuditEntry, reason: &str) {
        if let Err(e) = self.log(&entry.failed(reason)).await {
            warn!(request_id = %entry.id, error = %e, "could not audit failed commit");
        }
    }

    /// Check whether any audit backends are configured.
    pub async fn has_backends(&self) -> bool {
        !self.backends.read().await.is_empty()
    }
}

impl fmt::Debug for AuditManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::Mutex;

    use super::{AuditBackend, AuditEntry};
    use crate::error::AuditError;

    /// Collects entries in memory; can be switched into a failing mode.
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) entries: Mutex<Vec<AuditEntry>>,
        pub(crate) failing: AtomicBool,
    }

    #[async_trait::async_trait]
    impl AuditBackend for RecordingBackend {
        #[allow(clippy::unnecessary_literal_bound)]
        fn name(&self) -> &str {
            "recording"
        }

        async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AuditError::BackendFailure {
                    name: "recording".to_owned(),
                    reason: "disk full".to_owned(),
                });
            }
            self.entries.lock().await.push(entry.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::RecordingBackend;
    use super::*;

    fn entry() -> AuditEntry {
        AuditEntry::new(
            Actor::Account(AccountId::generate()),
            AuditAction::RevokeMembership,
            "groups/ops",
            serde_json::json!({ "account": "alice" }),
        )
    }

    #[tokio::test]
    async fn no_backends_is_ok() {
        let manager = AuditManager::new();
        assert!(!manager.has_backends().await);
        manager.log(&entry()).await.unwrap();
    }

    #[tokio::test]
    async fn one_healthy_backend_is_enough() {
        let manager = AuditManager::new();
        let healthy = Arc::new(RecordingBackend::default());
        let broken = Arc::new(RecordingBackend::default());
        broken.failing.store(true, Ordering::SeqCst);
        manager.add_backend(healthy.clone()).await;
        manager.add_backend(broken).await;

        manager.log(&entry()).await.unwrap();
        assert_eq!(healthy.entries.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn all_failing_is_fail_closed() {
        let manager = AuditManager::new();
        let broken = Arc::new(RecordingBackend::default());
        broken.failing.store(true, Ordering::SeqCst);
        manager.add_backend(broken).await;

        let result = manager.log(&entry()).await;
        assert!(matches!(result, Err(AuditError::AllBackendsFailed)));
    }

    #[test]
    fn failed_entry_links_back_to_request() {
        let original = entry();
        let failed = original.failed("commit failed");
        assert_eq!(failed.outcome, AuditOutcome::Failed);
        assert_eq!(failed.action, original.action);
        assert_ne!(failed.id, original.id);
        assert_eq!(failed.detail["request_id"], original.id.as_str());
    }

    #[test]
    fn actor_display() {
        assert_eq!(Actor::System.to_string(), "system");
        let id = AccountId::generate();
        assert_eq!(Actor::Account(id).to_string(), format!("account:{id}"));
    }
}
