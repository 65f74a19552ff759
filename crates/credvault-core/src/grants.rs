//! Grant ledger.
//!
//! A grant row is the only thing that gives a group access to a service. It
//! carries the service's symmetric key wrapped for the group's public key.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{Actor, AuditAction, AuditEntry, AuditManager};
use crate::error::VaultError;
use crate::ids::{GroupId, ServiceId};
use crate::model::{Grant, NewGrant, Service, blob};
use crate::rotation::{self, ServiceKeyRotation};
use crate::store::{Batch, Store, keys};

/// Group ↔ service bindings and their wrapped service keys.
#[derive(Debug)]
pub struct GrantLedger {
    store: Arc<Store>,
    audit: Arc<AuditManager>,
}

impl GrantLedger {
    pub(crate) fn new(store: Arc<Store>, audit: Arc<AuditManager>) -> Self {
        Self { store, audit }
    }

    /// Give a group access to a service.
    ///
    /// # Errors
    ///
    /// [`VaultError::DuplicateGrant`] if the pair already exists,
    /// [`VaultError::NotFound`] if either side is missing.
    pub async fn grant(&self, actor: Actor, new: NewGrant) -> Result<Grant, VaultError> {
        let wrapped_service_key = blob("wrapped_service_key", new.wrapped_service_key)?;

        let _guard = self.store.write_gate().await;
        self.store.group(new.group_id).await?;
        let service = self.store.service(new.service_id).await?;
        if self
            .store
            .grant(new.group_id, new.service_id)
            .await?
            .is_some()
        {
            return Err(VaultError::DuplicateGrant {
                group: new.group_id,
                service: new.service_id,
            });
        }

        let grant = Grant {
            group_id: new.group_id,
            service_id: service.id,
            wrapped_service_key,
            key_generation: service.key_generation,
            created_at: Utc::now(),
        };

        let mut batch = Batch::new();
        batch.put_grant(&grant)?;
        let entry = AuditEntry::new(
            actor,
            AuditAction::GrantAccess,
            keys::grant(grant.service_id, grant.group_id),
            serde_json::json!({ "group": grant.group_id, "service": grant.service_id }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(group = %grant.group_id, service = %grant.service_id, "access granted");
        Ok(grant)
    }

    /// Withdraw a group's access to a service.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the group holds no grant on the service.
    pub async fn revoke(
        &self,
        actor: Actor,
        group: GroupId,
        service: ServiceId,
    ) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        self.existing(group, service).await?;

        let mut batch = Batch::new();
        batch.delete_grant(group, service);
        let entry = AuditEntry::new(
            actor,
            AuditAction::RevokeAccess,
            keys::grant(service, group),
            serde_json::json!({ "group": group, "service": service }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(%group, %service, "access revoked");
        Ok(())
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if the group holds no grant on the service.
    pub async fn get(&self, group: GroupId, service: ServiceId) -> Result<Grant, VaultError> {
        self.existing(group, service).await
    }

    /// Grants on one service, ordered by group.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown service.
    pub async fn grants_for_service(&self, service: ServiceId) -> Result<Vec<Grant>, VaultError> {
        let _guard = self.store.read_gate().await;
        self.store.service(service).await?;
        let mut grants = self.store.grants_of_service(service).await?;
        grants.sort_by_key(|g| g.group_id);
        Ok(grants)
    }

    /// Grants held by one group, ordered by service.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown group.
    pub async fn services_for_group(&self, group: GroupId) -> Result<Vec<Grant>, VaultError> {
        let _guard = self.store.read_gate().await;
        self.store.group(group).await?;
        let mut grants = self.store.grants_of_group(group).await?;
        grants.sort_by_key(|g| g.service_id);
        Ok(grants)
    }

    /// Rotate a service's symmetric key.
    ///
    /// The secret is replaced with its re-encryption under the new key and
    /// every grant receives the new key wrapped for its group.
    ///
    /// # Errors
    ///
    /// [`VaultError::PartialRotationFailure`] when `rotation.grant_keys` does
    /// not name exactly the groups currently granted, or the batch fails to
    /// commit. Nothing is written in either case.
    pub async fn rotate_service_key(
        &self,
        actor: Actor,
        service: ServiceId,
        rotation: ServiceKeyRotation,
    ) -> Result<Service, VaultError> {
        let secret = blob("secret", rotation.secret)?;

        let _guard = self.store.write_gate().await;
        let mut record = self.store.service(service).await?;
        let grants = self.store.grants_of_service(service).await?;
        let holders: BTreeSet<_> = grants.iter().map(|g| g.group_id).collect();
        rotation::ensure_exact_cover("wrapped service key", &holders, &rotation.grant_keys)?;

        record.secret = secret;
        record.key_generation += 1;
        record.updated_at = Utc::now();

        let mut batch = Batch::new();
        batch.put_service(&record, record.parent_id)?;
        for mut grant in grants {
            if let Some(wrapped) = rotation.grant_keys.get(&grant.group_id) {
                grant.wrapped_service_key.clone_from(wrapped);
                grant.key_generation = record.key_generation;
                batch.put_grant(&grant)?;
            }
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::RotateServiceKey,
            keys::service(service),
            serde_json::json!({
                "key_generation": record.key_generation,
                "grants": holders.len(),
            }),
        );
        if let Err(e) = self.store.commit_audited(&self.audit, &entry, batch).await {
            warn!(%service, error = %e, "service key rotation not applied");
            return Err(rotation::commit_failure(e));
        }

        info!(
            %service,
            key_generation = record.key_generation,
            grants = holders.len(),
            "service key rotated"
        );
        Ok(record)
    }

    async fn existing(&self, group: GroupId, service: ServiceId) -> Result<Grant, VaultError> {
        self.store
            .grant(group, service)
            .await?
            .ok_or_else(|| VaultError::not_found("grant", format!("{group}/{service}")))
    }
}
