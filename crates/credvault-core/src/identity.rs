//! Identity registry: accounts and their public keys.
//!
//! An account's public key is what every membership blob is wrapped for, so
//! it is frozen once the account belongs to any group. Replacing it after
//! that goes through [`IdentityRegistry::rotate_key`], which re-wraps every
//! membership in the same batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::{Actor, AuditAction, AuditEntry, AuditManager};
use crate::error::VaultError;
use crate::ids::{AccountId, CustomerId};
use crate::model::{
    Account, AccountFilter, AccountUpdate, NewAccount, apply_optional, blob, optional, required,
};
use crate::rotation::{self, AccountKeyRotation};
use crate::store::{Batch, Store, keys};

/// Accounts, keyed by id and by unique username.
#[derive(Debug)]
pub struct IdentityRegistry {
    store: Arc<Store>,
    audit: Arc<AuditManager>,
}

impl IdentityRegistry {
    pub(crate) fn new(store: Arc<Store>, audit: Arc<AuditManager>) -> Self {
        Self { store, audit }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// [`VaultError::Conflict`] when the username is taken,
    /// [`VaultError::Invalid`] for a blank username, department or key.
    pub async fn register(&self, new: NewAccount) -> Result<Account, VaultError> {
        let username = username(&new.username)?;
        let department = required("department", &new.department)?;
        let public_key = blob("public_key", new.public_key)?;

        let _guard = self.store.write_gate().await;
        if self.store.exists(&keys::username(&username)).await? {
            return Err(VaultError::Conflict {
                reason: format!("username '{username}' is already registered"),
            });
        }

        let now = Utc::now();
        let account = Account {
            id: AccountId::generate(),
            username,
            email: optional(new.email),
            department,
            public_key,
            created_at: now,
            updated_at: now,
        };

        let mut batch = Batch::new();
        batch.put(keys::account(account.id), &account)?;
        batch.put(keys::username(&account.username), &account.id)?;
        self.store.commit(batch).await?;

        info!(account = %account.id, username = %account.username, "account registered");
        Ok(account)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such account exists.
    pub async fn lookup(&self, id: AccountId) -> Result<Account, VaultError> {
        self.store.account(id).await
    }

    /// Find an account by its exact username.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no account has that username.
    pub async fn find_by_username(&self, name: &str) -> Result<Account, VaultError> {
        let _guard = self.store.read_gate().await;
        let id: AccountId = self
            .store
            .get(&keys::username(name))
            .await?
            .ok_or_else(|| VaultError::not_found("account", name))?;
        self.store.account(id).await
    }

    /// All accounts matching `filter`, ordered by username.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>, VaultError> {
        let needle = filter.username.as_deref().map(str::to_lowercase);
        let mut accounts: Vec<Account> = self.store.scan(keys::ACCOUNTS).await?;
        accounts.retain(|a| {
            needle
                .as_deref()
                .is_none_or(|n| a.username.to_lowercase().contains(n))
                && filter
                    .department
                    .as_deref()
                    .is_none_or(|d| a.department == d)
        });
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    /// Whether no account has been registered yet.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_empty(&self) -> Result<bool, VaultError> {
        Ok(self.store.index::<AccountId>(keys::ACCOUNTS).await?.is_empty())
    }

    /// Update profile fields.
    ///
    /// The public key may only change while the account holds no membership.
    ///
    /// # Errors
    ///
    /// [`VaultError::KeyRotationConflict`] when a new public key is supplied
    /// for an account that belongs to any group.
    pub async fn update(&self, id: AccountId, changes: AccountUpdate) -> Result<Account, VaultError> {
        let _guard = self.store.write_gate().await;
        let mut account = self.store.account(id).await?;

        if let Some(public_key) = changes.public_key {
            let public_key = blob("public_key", public_key)?;
            if public_key != account.public_key {
                let dependents = self.store.group_ids_of(id).await?.len();
                if dependents > 0 {
                    return Err(VaultError::KeyRotationConflict {
                        entity: "account",
                        id: id.to_string(),
                        dependents,
                    });
                }
                account.public_key = public_key;
            }
        }
        if let Some(department) = changes.department {
            account.department = required("department", &department)?;
        }
        apply_optional(&mut account.email, changes.email);
        account.updated_at = Utc::now();

        let mut batch = Batch::new();
        batch.put(keys::account(id), &account)?;
        self.store.commit(batch).await?;

        info!(account = %id, "account updated");
        Ok(account)
    }

    /// Replace the account's keypair and every membership blob wrapped for it.
    ///
    /// # Errors
    ///
    /// [`VaultError::PartialRotationFailure`] when `rotation.group_keys` does
    /// not name exactly the account's current groups, or the batch fails to
    /// commit. Nothing is written in either case.
    pub async fn rotate_key(
        &self,
        actor: Actor,
        id: AccountId,
        rotation: AccountKeyRotation,
    ) -> Result<Account, VaultError> {
        let public_key = blob("public_key", rotation.public_key)?;

        let _guard = self.store.write_gate().await;
        let mut account = self.store.account(id).await?;
        let groups: BTreeSet<_> = self.store.group_ids_of(id).await?.into_iter().collect();
        rotation::ensure_exact_cover("wrapped group key", &groups, &rotation.group_keys)?;

        let now = Utc::now();
        let mut batch = Batch::new();
        for (group, wrapped) in rotation.group_keys {
            let mut membership = self
                .store
                .membership(group, id)
                .await?
                .ok_or_else(|| VaultError::not_found("membership", format!("{group}/{id}")))?;
            membership.wrapped_group_key = wrapped;
            membership.updated_at = now;
            batch.put_membership(&membership)?;
        }
        account.public_key = public_key;
        account.updated_at = now;
        batch.put(keys::account(id), &account)?;

        let entry = AuditEntry::new(
            actor,
            AuditAction::RotateAccountKey,
            keys::account(id),
            serde_json::json!({ "memberships": groups.len() }),
        );
        self.store
            .commit_audited(&self.audit, &entry, batch)
            .await
            .map_err(rotation::commit_failure)?;

        info!(account = %id, memberships = groups.len(), "account key rotated");
        Ok(account)
    }

    /// Delete an account, its memberships, and its claim on the customers it
    /// created.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the account does not exist.
    pub async fn delete(&self, actor: Actor, id: AccountId) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        let account = self.store.account(id).await?;

        let mut batch = Batch::new();
        let groups = self.store.group_ids_of(id).await?;
        for group in &groups {
            batch.delete_membership(*group, id);
        }

        let created: Vec<CustomerId> = self.store.index(&keys::creator_customers(id)).await?;
        for customer_id in &created {
            let mut customer = self.store.customer(*customer_id).await?;
            customer.created_by = None;
            batch.put(keys::customer(customer.id), &customer)?;
            batch.delete(keys::creator_customer(id, customer.id));
        }

        batch.delete(keys::account(id));
        batch.delete(keys::username(&account.username));

        let entry = AuditEntry::new(
            actor,
            AuditAction::DeleteAccount,
            keys::account(id),
            serde_json::json!({
                "username": account.username,
                "memberships": groups.len(),
                "customers_released": created.len(),
            }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(account = %id, memberships = groups.len(), "account deleted");
        Ok(())
    }
}

/// Usernames are index keys, so they are restricted to one path segment.
fn username(raw: &str) -> Result<String, VaultError> {
    let name = required("username", raw)?;
    if name.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(VaultError::invalid(
            "username must not contain whitespace or '/'",
        ));
    }
    Ok(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vault::testing::{membership, memory_vault, new_account, new_group};

    #[tokio::test]
    async fn register_and_lookup() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();

        assert_eq!(vault.accounts.lookup(alice.id).await.unwrap(), alice);
        assert_eq!(
            vault.accounts.find_by_username("alice").await.unwrap().id,
            alice.id
        );
        assert!(!vault.accounts.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let vault = memory_vault();
        vault.accounts.register(new_account("alice")).await.unwrap();
        let err = vault.accounts.register(new_account("alice")).await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict { .. }));
        assert_eq!(
            vault.accounts.list(&AccountFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn register_rejects_blank_fields() {
        let vault = memory_vault();
        for bad in [
            NewAccount { username: "  ".into(), ..new_account("x") },
            NewAccount { username: "a/b".into(), ..new_account("x") },
            NewAccount { public_key: String::new(), ..new_account("x") },
            NewAccount { department: String::new(), ..new_account("x") },
        ] {
            let err = vault.accounts.register(bad).await.unwrap_err();
            assert!(matches!(err, VaultError::Invalid { .. }));
        }
        assert!(vault.accounts.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_and_orders_by_username() {
        let vault = memory_vault();
        for (name, dept) in [("carol", "ops"), ("alice", "ops"), ("bob", "dev")] {
            let mut new = new_account(name);
            new.department = dept.to_owned();
            vault.accounts.register(new).await.unwrap();
        }

        let all = vault.accounts.list(&AccountFilter::default()).await.unwrap();
        let names: Vec<_> = all.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);

        let ops = vault
            .accounts
            .list(&AccountFilter {
                department: Some("ops".into()),
                ..AccountFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(ops.len(), 2);

        let matched = vault
            .accounts
            .list(&AccountFilter {
                username: Some("AR".into()),
                ..AccountFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].username, "carol");
    }

    #[tokio::test]
    async fn public_key_frozen_while_member() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();

        // No memberships yet: the key can still be replaced.
        let updated = vault
            .accounts
            .update(
                alice.id,
                AccountUpdate {
                    public_key: Some("pk-alice-2".into()),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.public_key, "pk-alice-2");

        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();

        let err = vault
            .accounts
            .update(
                alice.id,
                AccountUpdate {
                    public_key: Some("pk-alice-3".into()),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::KeyRotationConflict { dependents: 1, .. }
        ));

        // Profile fields stay editable.
        let updated = vault
            .accounts
            .update(
                alice.id,
                AccountUpdate {
                    email: Some("alice@example.com".into()),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email.as_deref(), Some("alice@example.com"));
        assert_eq!(updated.public_key, "pk-alice-2");
    }

    #[tokio::test]
    async fn key_rotation_rewraps_every_membership() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let dev = vault.groups.create(new_group("dev")).await.unwrap();
        for group in [ops.id, dev.id] {
            vault
                .memberships
                .grant(Actor::System, membership(alice.id, group))
                .await
                .unwrap();
        }

        let partial = AccountKeyRotation {
            public_key: "pk-alice-2".into(),
            group_keys: [(ops.id, "gk-ops-alice2".to_owned())].into(),
        };
        let err = vault
            .accounts
            .rotate_key(Actor::System, alice.id, partial)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::PartialRotationFailure { .. }));
        assert_eq!(vault.accounts.lookup(alice.id).await.unwrap().public_key, "pk-alice");

        let rotated = vault
            .accounts
            .rotate_key(
                Actor::System,
                alice.id,
                AccountKeyRotation {
                    public_key: "pk-alice-2".into(),
                    group_keys: [
                        (ops.id, "gk-ops-alice2".to_owned()),
                        (dev.id, "gk-dev-alice2".to_owned()),
                    ]
                    .into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rotated.public_key, "pk-alice-2");

        let row = vault.memberships.get(alice.id, dev.id).await.unwrap();
        assert_eq!(row.wrapped_group_key, "gk-dev-alice2");
        // The group key itself did not change.
        assert_eq!(row.key_generation, 1);
    }

    #[tokio::test]
    async fn delete_cascades_memberships() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        vault
            .memberships
            .grant(Actor::System, membership(alice.id, ops.id))
            .await
            .unwrap();

        vault.accounts.delete(Actor::System, alice.id).await.unwrap();

        assert!(vault.memberships.members_of(ops.id).await.unwrap().is_empty());
        assert!(matches!(
            vault.accounts.find_by_username("alice").await,
            Err(VaultError::NotFound { .. })
        ));
        // The username is free again.
        vault.accounts.register(new_account("alice")).await.unwrap();
    }
}
