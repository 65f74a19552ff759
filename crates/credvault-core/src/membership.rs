//! Membership ledger.
//!
//! A membership row is the only thing that makes an account a member of a
//! group. It carries the group's private key wrapped for the account's public
//! key; revoking the row is what removes the account's path to every service
//! the group can reach.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{Actor, AuditAction, AuditEntry, AuditManager};
use crate::error::VaultError;
use crate::ids::{AccountId, GroupId};
use crate::model::{AccountGroup, GroupMembership, Member, NewMembership, blob};
use crate::rotation::{self, GroupKeyRotation};
use crate::store::{Batch, Store, keys};

/// Account ↔ group bindings and their wrapped group keys.
#[derive(Debug)]
pub struct MembershipLedger {
    store: Arc<Store>,
    audit: Arc<AuditManager>,
}

impl MembershipLedger {
    pub(crate) fn new(store: Arc<Store>, audit: Arc<AuditManager>) -> Self {
        Self { store, audit }
    }

    /// Add an account to a group.
    ///
    /// The wrapped key is stored as given; it is stamped with the group's
    /// current key generation.
    ///
    /// # Errors
    ///
    /// [`VaultError::DuplicateMembership`] if the pair already exists,
    /// [`VaultError::NotFound`] if either side is missing.
    pub async fn grant(
        &self,
        actor: Actor,
        new: NewMembership,
    ) -> Result<GroupMembership, VaultError> {
        let wrapped_group_key = blob("wrapped_group_key", new.wrapped_group_key)?;

        let _guard = self.store.write_gate().await;
        self.store.account(new.account_id).await?;
        let group = self.store.group(new.group_id).await?;
        if self
            .store
            .membership(new.group_id, new.account_id)
            .await?
            .is_some()
        {
            return Err(VaultError::DuplicateMembership {
                account: new.account_id,
                group: new.group_id,
            });
        }

        let now = Utc::now();
        let membership = GroupMembership {
            account_id: new.account_id,
            group_id: new.group_id,
            is_admin: new.is_admin,
            wrapped_group_key,
            key_generation: group.key_generation,
            created_at: now,
            updated_at: now,
        };

        let mut batch = Batch::new();
        batch.put_membership(&membership)?;
        let entry = AuditEntry::new(
            actor,
            AuditAction::GrantMembership,
            keys::membership(group.id, membership.account_id),
            serde_json::json!({
                "account": membership.account_id,
                "group": group.id,
                "is_admin": membership.is_admin,
            }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(
            account = %membership.account_id,
            group = %group.id,
            is_admin = membership.is_admin,
            "membership granted"
        );
        Ok(membership)
    }

    /// Remove an account from a group.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the account is not a member.
    pub async fn revoke(
        &self,
        actor: Actor,
        account: AccountId,
        group: GroupId,
    ) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        self.existing(account, group).await?;

        let mut batch = Batch::new();
        batch.delete_membership(group, account);
        let entry = AuditEntry::new(
            actor,
            AuditAction::RevokeMembership,
            keys::membership(group, account),
            serde_json::json!({ "account": account, "group": group }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(%account, %group, "membership revoked");
        Ok(())
    }

    /// Toggle the admin flag on an existing membership.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the account is not a member.
    pub async fn set_admin(
        &self,
        actor: Actor,
        account: AccountId,
        group: GroupId,
        is_admin: bool,
    ) -> Result<GroupMembership, VaultError> {
        let _guard = self.store.write_gate().await;
        let mut membership = self.existing(account, group).await?;
        if membership.is_admin == is_admin {
            return Ok(membership);
        }
        membership.is_admin = is_admin;
        membership.updated_at = Utc::now();

        let mut batch = Batch::new();
        batch.put_membership(&membership)?;
        let entry = AuditEntry::new(
            actor,
            AuditAction::SetMembershipAdmin,
            keys::membership(group, account),
            serde_json::json!({ "account": account, "group": group, "is_admin": is_admin }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(%account, %group, is_admin, "membership admin flag changed");
        Ok(membership)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the account is not a member.
    pub async fn get(
        &self,
        account: AccountId,
        group: GroupId,
    ) -> Result<GroupMembership, VaultError> {
        self.existing(account, group).await
    }

    /// Whether `account` holds an admin membership in `group`. Non-members
    /// are simply not admins.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn is_admin(&self, account: AccountId, group: GroupId) -> Result<bool, VaultError> {
        Ok(self
            .store
            .membership(group, account)
            .await?
            .is_some_and(|m| m.is_admin))
    }

    /// The groups an account belongs to directly, ordered by name.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown account.
    pub async fn groups_for(&self, account: AccountId) -> Result<Vec<AccountGroup>, VaultError> {
        let _guard = self.store.read_gate().await;
        self.store.account(account).await?;

        let mut groups = Vec::new();
        for id in self.store.group_ids_of(account).await? {
            groups.push(self.store.group(id).await?);
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    /// The members of a group, ordered by username.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown group.
    pub async fn members_of(&self, group: GroupId) -> Result<Vec<Member>, VaultError> {
        let _guard = self.store.read_gate().await;
        self.store.group(group).await?;

        let mut members = Vec::new();
        for m in self.store.memberships_of_group(group).await? {
            let account = self.store.account(m.account_id).await?;
            members.push(Member {
                account_id: m.account_id,
                username: account.username,
                is_admin: m.is_admin,
                key_generation: m.key_generation,
            });
        }
        members.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(members)
    }

    /// Rotate a group's keypair.
    ///
    /// Every membership gets the new private key wrapped for its account, and
    /// every grant held by the group gets its service key re-wrapped for the
    /// new public key. The group's key generation moves forward by one.
    ///
    /// # Errors
    ///
    /// [`VaultError::PartialRotationFailure`] when either map does not cover
    /// the current rows exactly, or the batch fails to commit. Nothing is
    /// written in either case.
    pub async fn rotate_group_key(
        &self,
        actor: Actor,
        group: GroupId,
        rotation: GroupKeyRotation,
    ) -> Result<AccountGroup, VaultError> {
        let public_key = blob("public_key", rotation.public_key)?;

        let _guard = self.store.write_gate().await;
        let mut record = self.store.group(group).await?;
        let memberships = self.store.memberships_of_group(group).await?;
        let grants = self.store.grants_of_group(group).await?;

        let members: BTreeSet<_> = memberships.iter().map(|m| m.account_id).collect();
        let services: BTreeSet<_> = grants.iter().map(|g| g.service_id).collect();
        rotation::ensure_exact_cover("wrapped group key", &members, &rotation.member_keys)?;
        rotation::ensure_exact_cover("wrapped service key", &services, &rotation.grant_keys)?;

        record.public_key = public_key;
        record.key_generation += 1;
        let now = Utc::now();

        let mut batch = Batch::new();
        batch.put(keys::group(group), &record)?;
        for mut membership in memberships {
            if let Some(wrapped) = rotation.member_keys.get(&membership.account_id) {
                membership.wrapped_group_key.clone_from(wrapped);
                membership.key_generation = record.key_generation;
                membership.updated_at = now;
                batch.put_membership(&membership)?;
            }
        }
        for mut grant in grants {
            if let Some(wrapped) = rotation.grant_keys.get(&grant.service_id) {
                grant.wrapped_service_key.clone_from(wrapped);
                batch.put_grant(&grant)?;
            }
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::RotateGroupKey,
            keys::group(group),
            serde_json::json!({
                "key_generation": record.key_generation,
                "memberships": members.len(),
                "grants": services.len(),
            }),
        );
        if let Err(e) = self.store.commit_audited(&self.audit, &entry, batch).await {
            warn!(%group, error = %e, "group key rotation not applied");
            return Err(rotation::commit_failure(e));
        }

        info!(
            %group,
            key_generation = record.key_generation,
            memberships = members.len(),
            grants = services.len(),
            "group key rotated"
        );
        Ok(record)
    }

    async fn existing(
        &self,
        account: AccountId,
        group: GroupId,
    ) -> Result<GroupMembership, VaultError> {
        self.store
            .membership(group, account)
            .await?
            .ok_or_else(|| VaultError::not_found("membership", format!("{group}/{account}")))
    }
}
