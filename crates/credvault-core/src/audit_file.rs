//! File-based audit backend for `CredVault`.
//!
//! Appends JSON-lines audit entries to a file. Each line is a complete
//! JSON object representing one [`AuditEntry`]. The file is opened in
//! append-only mode; no update or delete operations are ever performed.
//!
//! Writes are serialized through a `tokio::sync::Mutex` around the handle.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::{AuditBackend, AuditEntry};
use crate::error::AuditError;

/// Audit backend that writes JSON-lines to a file.
pub struct FileAuditBackend {
    path: PathBuf,
    writer: Mutex<Option<tokio::fs::File>>,
}

impl FileAuditBackend {
    /// Create a new file audit backend writing to the given path.
    ///
    /// The file is created (or opened for append) lazily on the first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    fn failure(&self, reason: String) -> AuditError {
        AuditError::BackendFailure {
            name: self.name().to_owned(),
            reason,
        }
    }
}

#[async_trait::async_trait]
impl AuditBackend for FileAuditBackend {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "file"
    }

    async fn log(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| {
                    self.failure(format!(
                        "failed to open audit file '{}': {e}",
                        self.path.display()
                    ))
                })?;
            *guard = Some(file);
        }
        let file = guard
            .as_mut()
            .ok_or_else(|| self.failure("file handle unexpectedly None after open".to_owned()))?;

        file.write_all(&line)
            .await
            .map_err(|e| self.failure(format!("write failed: {e}")))?;
        file.flush()
            .await
            .map_err(|e| self.failure(format!("flush failed: {e}")))?;

        Ok(())
    }
}

impl std::fmt::Debug for FileAuditBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use credvault_storage::MemoryBackend;

    use super::*;
    use crate::audit::{Actor, AuditAction, AuditManager};
    use crate::rotation::ServiceKeyRotation;
    use crate::vault::testing::{grant, membership, new_account, new_group, new_service};
    use crate::vault::{Vault, VaultConfig};

    #[tokio::test]
    async fn appends_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let backend = FileAuditBackend::new(&path);

        for action in [AuditAction::GrantAccess, AuditAction::RevokeAccess] {
            let entry = AuditEntry::new(Actor::System, action, "services/db1", serde_json::json!({}));
            backend.log(&entry).await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.action, AuditAction::RevokeAccess);
    }

    #[tokio::test]
    async fn unwritable_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileAuditBackend::new(dir.path().join("missing").join("audit.log"));
        let entry = AuditEntry::new(
            Actor::System,
            AuditAction::DeleteGroup,
            "groups/x",
            serde_json::json!({}),
        );
        let result = backend.log(&entry).await;
        assert!(matches!(result, Err(AuditError::BackendFailure { .. })));
    }

    #[tokio::test]
    async fn trail_records_ids_but_never_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let audit = Arc::new(AuditManager::new());
        audit.add_backend(Arc::new(FileAuditBackend::new(&path))).await;
        let vault = Vault::new(Arc::new(MemoryBackend::new()), audit, VaultConfig::default());

        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let db1 = new_service(&vault, "db1").await;
        let member = membership(alice.id, ops.id);
        let access = grant(ops.id, db1.id);
        let blobs = [
            member.wrapped_group_key.clone(),
            access.wrapped_service_key.clone(),
            db1.secret.clone(),
            "ct-db1-rotated".to_owned(),
            "swrap2:db1:ops".to_owned(),
        ];
        vault.memberships.grant(Actor::Account(alice.id), member).await.unwrap();
        vault.grants.grant(Actor::Account(alice.id), access).await.unwrap();
        vault
            .grants
            .rotate_service_key(
                Actor::Account(alice.id),
                db1.id,
                ServiceKeyRotation {
                    secret: blobs[3].clone(),
                    grant_keys: BTreeMap::from([(ops.id, blobs[4].clone())]),
                },
            )
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let entries: Vec<AuditEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [
                AuditAction::GrantMembership,
                AuditAction::GrantAccess,
                AuditAction::RotateServiceKey,
            ]
        );
        assert!(content.contains(&alice.id.to_string()));
        assert!(content.contains(&db1.id.to_string()));
        for blob in &blobs {
            assert!(!content.contains(blob.as_str()), "audit trail leaked {blob}");
        }
    }
}
