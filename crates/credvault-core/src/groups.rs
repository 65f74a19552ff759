//! Group directory.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::{Actor, AuditAction, AuditEntry, AuditManager};
use crate::cascade;
use crate::error::VaultError;
use crate::ids::GroupId;
use crate::model::{AccountGroup, GroupUpdate, NewGroup, blob, required};
use crate::store::{Batch, Store, keys};
use crate::vault::DeletePolicy;

/// Named groups and their public keys.
#[derive(Debug)]
pub struct GroupDirectory {
    store: Arc<Store>,
    audit: Arc<AuditManager>,
    policy: DeletePolicy,
}

impl GroupDirectory {
    pub(crate) fn new(store: Arc<Store>, audit: Arc<AuditManager>, policy: DeletePolicy) -> Self {
        Self {
            store,
            audit,
            policy,
        }
    }

    /// Create a group at key generation 1.
    ///
    /// # Errors
    ///
    /// [`VaultError::Invalid`] for a blank name or public key.
    pub async fn create(&self, new: NewGroup) -> Result<AccountGroup, VaultError> {
        let group = AccountGroup {
            id: GroupId::generate(),
            name: required("name", &new.name)?,
            public_key: blob("public_key", new.public_key)?,
            is_hidden: new.is_hidden,
            key_generation: 1,
            created_at: Utc::now(),
        };

        let _guard = self.store.write_gate().await;
        let mut batch = Batch::new();
        batch.put(keys::group(group.id), &group)?;
        self.store.commit(batch).await?;

        info!(group = %group.id, name = %group.name, hidden = group.is_hidden, "group created");
        Ok(group)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such group exists.
    pub async fn lookup(&self, id: GroupId) -> Result<AccountGroup, VaultError> {
        self.store.group(id).await
    }

    /// Groups ordered by name. Hidden groups are left out unless asked for.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self, include_hidden: bool) -> Result<Vec<AccountGroup>, VaultError> {
        let mut groups: Vec<AccountGroup> = self.store.scan(keys::GROUPS).await?;
        groups.retain(|g| include_hidden || !g.is_hidden);
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] or [`VaultError::Invalid`] for a blank name.
    pub async fn rename(&self, id: GroupId, name: &str) -> Result<AccountGroup, VaultError> {
        self.update(
            id,
            GroupUpdate {
                name: Some(name.to_owned()),
                ..GroupUpdate::default()
            },
        )
        .await
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such group exists.
    pub async fn set_hidden(&self, id: GroupId, hidden: bool) -> Result<AccountGroup, VaultError> {
        self.update(
            id,
            GroupUpdate {
                is_hidden: Some(hidden),
                ..GroupUpdate::default()
            },
        )
        .await
    }

    /// Apply a set of changes in one write.
    ///
    /// Every field is validated before anything is read, and a new public
    /// key is only accepted while no membership or grant is wrapped for the
    /// group. Either all changes land or none do.
    ///
    /// # Errors
    ///
    /// [`VaultError::Invalid`] for a blank name or public key,
    /// [`VaultError::NotFound`] for an unknown group,
    /// [`VaultError::KeyRotationConflict`] for a key change once anything
    /// is wrapped for the group; use a group key rotation instead.
    pub async fn update(
        &self,
        id: GroupId,
        changes: GroupUpdate,
    ) -> Result<AccountGroup, VaultError> {
        let name = changes.name.as_deref().map(|n| required("name", n)).transpose()?;
        let public_key = changes
            .public_key
            .map(|pk| blob("public_key", pk))
            .transpose()?;

        let _guard = self.store.write_gate().await;
        let mut group = self.store.group(id).await?;

        let key_changed = public_key.as_ref().is_some_and(|pk| *pk != group.public_key);
        if key_changed {
            let dependents = self.store.memberships_of_group(id).await?.len()
                + self.store.service_ids_of_group(id).await?.len();
            if dependents > 0 {
                return Err(VaultError::KeyRotationConflict {
                    entity: "group",
                    id: id.to_string(),
                    dependents,
                });
            }
        }

        if let Some(name) = name {
            group.name = name;
        }
        if let Some(hidden) = changes.is_hidden {
            group.is_hidden = hidden;
        }
        if let Some(public_key) = public_key {
            group.public_key = public_key;
        }

        let mut batch = Batch::new();
        batch.put(keys::group(id), &group)?;
        self.store.commit(batch).await?;

        info!(group = %id, key_changed, "group updated");
        Ok(group)
    }

    /// Delete a group.
    ///
    /// Under [`DeletePolicy::Cascade`] its memberships and grants go with it
    /// in the same batch.
    ///
    /// # Errors
    ///
    /// [`VaultError::GroupInUse`] under [`DeletePolicy::Restrict`] while any
    /// membership or grant references the group.
    pub async fn delete(&self, actor: Actor, id: GroupId) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        let group = self.store.group(id).await?;

        let mut batch = Batch::new();
        let removal = cascade::remove_group(&self.store, &group, &mut batch).await?;
        if self.policy == DeletePolicy::Restrict && (removal.memberships > 0 || removal.grants > 0)
        {
            return Err(VaultError::GroupInUse {
                group: id,
                memberships: removal.memberships,
                grants: removal.grants,
            });
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::DeleteGroup,
            keys::group(id),
            serde_json::json!({
                "name": group.name,
                "memberships": removal.memberships,
                "grants": removal.grants,
            }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(
            group = %id,
            memberships = removal.memberships,
            grants = removal.grants,
            "group deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vault::testing::{
        grant, membership, memory_vault, memory_vault_with, new_account, new_group, new_service,
    };

    #[tokio::test]
    async fn hidden_groups_are_listed_on_request() {
        let vault = memory_vault();
        vault.groups.create(new_group("ops")).await.unwrap();
        let hidden = vault
            .groups
            .create(NewGroup {
                is_hidden: true,
                ..new_group("break-glass")
            })
            .await
            .unwrap();

        let visible = vault.groups.list(false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "ops");

        let all = vault.groups.list(true).await.unwrap();
        let names: Vec<_> = all.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["break-glass", "ops"]);

        let shown = vault.groups.set_hidden(hidden.id, false).await.unwrap();
        assert!(!shown.is_hidden);
        assert_eq!(vault.groups.list(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rename_keeps_key_material() {
        let vault = memory_vault();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let renamed = vault.groups.rename(ops.id, "  sre ").await.unwrap();
        assert_eq!(renamed.name, "sre");
        assert_eq!(renamed.public_key, ops.public_key);
        assert_eq!(renamed.key_generation, 1);

        assert!(matches!(
            vault.groups.rename(ops.id, "").await,
            Err(VaultError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn public_key_frozen_once_wrapped_for() {
        let vault = memory_vault();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        vault
            .groups
            .update(ops.id, new_key("pk-ops-2"))
            .await
            .unwrap();

        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();

        let err = vault
            .groups
            .update(ops.id, new_key("pk-ops-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::KeyRotationConflict { .. }));
        assert_eq!(vault.groups.lookup(ops.id).await.unwrap().public_key, "pk-ops-2");
    }

    #[tokio::test]
    async fn cascade_delete_removes_memberships_and_grants() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let db1 = new_service(&vault, "db1").await;
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();
        vault
            .grants
            .grant(Actor::System, grant(ops.id, db1.id))
            .await
            .unwrap();

        vault.groups.delete(Actor::System, ops.id).await.unwrap();

        assert!(matches!(
            vault.groups.lookup(ops.id).await,
            Err(VaultError::NotFound { .. })
        ));
        assert!(vault.memberships.groups_for(alice.id).await.unwrap().is_empty());
        assert!(vault.grants.grants_for_service(db1.id).await.unwrap().is_empty());
        assert!(vault.resolver.resolve(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restrict_delete_refuses_referenced_group() {
        let vault = memory_vault_with(DeletePolicy::Restrict);
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();

        let err = vault.groups.delete(Actor::System, ops.id).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::GroupInUse {
                memberships: 1,
                grants: 0,
                ..
            }
        ));
        vault.memberships.get(alice.id, ops.id).await.unwrap();

        vault
            .memberships
            .revoke(Actor::System, alice.id, ops.id)
            .await
            .unwrap();
        vault.groups.delete(Actor::System, ops.id).await.unwrap();

        // An empty group is inert but stays until deleted explicitly.
        let empty = vault.groups.create(new_group("empty")).await.unwrap();
        assert_eq!(vault.groups.lookup(empty.id).await.unwrap().name, "empty");
    }

    #[tokio::test]
    async fn rejected_update_changes_nothing() {
        let vault = memory_vault();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();

        let err = vault
            .groups
            .update(
                ops.id,
                GroupUpdate {
                    name: Some("   ".into()),
                    is_hidden: Some(true),
                    public_key: Some("pk-new".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Invalid { .. }));
        assert_eq!(vault.groups.lookup(ops.id).await.unwrap(), ops);

        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();
        let err = vault
            .groups
            .update(
                ops.id,
                GroupUpdate {
                    name: Some("sre".into()),
                    public_key: Some("pk-new".into()),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::KeyRotationConflict { dependents: 1, .. }));
        assert_eq!(vault.groups.lookup(ops.id).await.unwrap().name, "ops");

        // Resubmitting the current key is not a change.
        let renamed = vault
            .groups
            .update(
                ops.id,
                GroupUpdate {
                    name: Some("sre".into()),
                    public_key: Some(ops.public_key.clone()),
                    ..GroupUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "sre");
    }

    fn new_key(public_key: &str) -> GroupUpdate {
        GroupUpdate {
            public_key: Some(public_key.into()),
            ..GroupUpdate::default()
        }
    }
}
