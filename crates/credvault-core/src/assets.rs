//! Asset hierarchy: customers, service groups and services.
//!
//! Ownership runs customer → service group → service and deletes cascade
//! down that chain. The optional `parent_id` links (service group to service
//! group, service to service group) are organizational only: deleting the
//! target clears the link and never removes the linked record. None of this
//! hierarchy is consulted when resolving access.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::{Actor, AuditAction, AuditEntry, AuditManager};
use crate::cascade;
use crate::error::VaultError;
use crate::ids::{CustomerId, ServiceGroupId, ServiceId};
use crate::model::{
    Customer, NewCustomer, NewService, NewServiceGroup, Service, ServiceGroup,
    ServiceGroupUpdate, ServiceUpdate, apply_optional, blob, optional, required,
};
use crate::store::{Batch, Store, keys};
use crate::vault::DeletePolicy;

/// CRUD over the asset hierarchy.
#[derive(Debug)]
pub struct AssetHierarchy {
    store: Arc<Store>,
    audit: Arc<AuditManager>,
    policy: DeletePolicy,
}

impl AssetHierarchy {
    pub(crate) fn new(store: Arc<Store>, audit: Arc<AuditManager>, policy: DeletePolicy) -> Self {
        Self {
            store,
            audit,
            policy,
        }
    }

    // ── Customers ────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`VaultError::Invalid`] for a blank name, [`VaultError::NotFound`]
    /// for an unknown creator.
    pub async fn create_customer(&self, new: NewCustomer) -> Result<Customer, VaultError> {
        let name = required("name", &new.name)?;

        let _guard = self.store.write_gate().await;
        if let Some(creator) = new.created_by {
            self.store.account(creator).await?;
        }
        let customer = Customer {
            id: CustomerId::generate(),
            name,
            created_by: new.created_by,
            created_at: Utc::now(),
        };

        let mut batch = Batch::new();
        batch.put(keys::customer(customer.id), &customer)?;
        if let Some(creator) = customer.created_by {
            batch.mark(keys::creator_customer(creator, customer.id));
        }
        self.store.commit(batch).await?;

        info!(customer = %customer.id, name = %customer.name, "customer created");
        Ok(customer)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such customer exists.
    pub async fn customer(&self, id: CustomerId) -> Result<Customer, VaultError> {
        self.store.customer(id).await
    }

    /// Customers ordered by name.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn customers(&self) -> Result<Vec<Customer>, VaultError> {
        let mut customers: Vec<Customer> = self.store.scan(keys::CUSTOMERS).await?;
        customers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(customers)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] or [`VaultError::Invalid`] for a blank name.
    pub async fn rename_customer(&self, id: CustomerId, name: &str) -> Result<Customer, VaultError> {
        let name = required("name", name)?;

        let _guard = self.store.write_gate().await;
        let mut customer = self.store.customer(id).await?;
        customer.name = name;

        let mut batch = Batch::new();
        batch.put(keys::customer(id), &customer)?;
        self.store.commit(batch).await?;

        info!(customer = %id, "customer renamed");
        Ok(customer)
    }

    /// Delete a customer with all of its service groups and their services.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such customer exists,
    /// [`VaultError::ServiceInUse`] under [`DeletePolicy::Restrict`] while
    /// any of its services holds a grant.
    pub async fn delete_customer(&self, actor: Actor, id: CustomerId) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        let customer = self.store.customer(id).await?;
        let doomed = self.service_groups_of(id).await?;

        let mut batch = Batch::new();
        let removal =
            cascade::remove_service_groups(&self.store, &doomed, self.policy, &mut batch).await?;
        batch.delete(keys::customer(id));
        if let Some(creator) = customer.created_by {
            batch.delete(keys::creator_customer(creator, id));
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::DeleteCustomer,
            keys::customer(id),
            serde_json::json!({ "name": customer.name, "removed": removal }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(
            customer = %id,
            service_groups = removal.service_groups,
            services = removal.services,
            grants = removal.grants,
            "customer deleted"
        );
        Ok(())
    }

    // ── Service groups ───────────────────────────────────────────────

    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown customer,
    /// [`VaultError::Invalid`] for a blank name or a parent that belongs to
    /// another customer.
    pub async fn create_service_group(
        &self,
        new: NewServiceGroup,
    ) -> Result<ServiceGroup, VaultError> {
        let name = required("name", &new.name)?;

        let _guard = self.store.write_gate().await;
        self.store.customer(new.customer_id).await?;
        if let Some(parent) = new.parent_id {
            self.check_parent(new.customer_id, parent, None).await?;
        }

        let sg = ServiceGroup {
            id: ServiceGroupId::generate(),
            customer_id: new.customer_id,
            parent_id: new.parent_id,
            name,
            fqdn: optional(new.fqdn),
            ip: optional(new.ip),
            location: optional(new.location),
            notes: optional(new.notes),
            created_at: Utc::now(),
        };

        let mut batch = Batch::new();
        batch.put_service_group(&sg, None)?;
        self.store.commit(batch).await?;

        info!(service_group = %sg.id, customer = %sg.customer_id, name = %sg.name, "service group created");
        Ok(sg)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such service group exists.
    pub async fn service_group(&self, id: ServiceGroupId) -> Result<ServiceGroup, VaultError> {
        self.store.service_group(id).await
    }

    /// Service groups ordered by name, optionally limited to one customer.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown customer.
    pub async fn service_groups(
        &self,
        customer: Option<CustomerId>,
    ) -> Result<Vec<ServiceGroup>, VaultError> {
        let _guard = self.store.read_gate().await;
        let mut groups = match customer {
            Some(id) => {
                self.store.customer(id).await?;
                self.service_groups_of(id).await?
            }
            None => self.store.scan(keys::SERVICE_GROUPS).await?,
        };
        groups.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    /// Apply descriptive changes and optionally move the group under a new
    /// parent.
    ///
    /// # Errors
    ///
    /// [`VaultError::Invalid`] when the new parent would create a cycle or
    /// belongs to another customer.
    pub async fn update_service_group(
        &self,
        id: ServiceGroupId,
        changes: ServiceGroupUpdate,
    ) -> Result<ServiceGroup, VaultError> {
        let _guard = self.store.write_gate().await;
        let mut sg = self.store.service_group(id).await?;
        let previous_parent = sg.parent_id;

        if let Some(name) = changes.name {
            sg.name = required("name", &name)?;
        }
        if let Some(parent) = changes.parent_id {
            if let Some(parent) = parent {
                self.check_parent(sg.customer_id, parent, Some(id)).await?;
            }
            sg.parent_id = parent;
        }
        apply_optional(&mut sg.fqdn, changes.fqdn);
        apply_optional(&mut sg.ip, changes.ip);
        apply_optional(&mut sg.location, changes.location);
        apply_optional(&mut sg.notes, changes.notes);

        let mut batch = Batch::new();
        batch.put_service_group(&sg, previous_parent)?;
        self.store.commit(batch).await?;

        info!(service_group = %id, "service group updated");
        Ok(sg)
    }

    /// Delete a service group and the services it owns.
    ///
    /// Child service groups and services that merely name this group as
    /// their parent are kept with the link cleared.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such service group exists,
    /// [`VaultError::ServiceInUse`] under [`DeletePolicy::Restrict`] while
    /// any service it owns holds a grant.
    pub async fn delete_service_group(
        &self,
        actor: Actor,
        id: ServiceGroupId,
    ) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        let sg = self.store.service_group(id).await?;

        let mut batch = Batch::new();
        let removal = cascade::remove_service_groups(
            &self.store,
            std::slice::from_ref(&sg),
            self.policy,
            &mut batch,
        )
        .await?;

        let entry = AuditEntry::new(
            actor,
            AuditAction::DeleteServiceGroup,
            keys::service_group(id),
            serde_json::json!({ "name": sg.name, "removed": removal }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(
            service_group = %id,
            services = removal.services,
            grants = removal.grants,
            detached = removal.detached_service_groups + removal.detached_services,
            "service group deleted"
        );
        Ok(())
    }

    // ── Services ─────────────────────────────────────────────────────

    /// Create a service at key generation 1.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown owning or parent service
    /// group, [`VaultError::Invalid`] for a blank url or secret.
    pub async fn create_service(&self, new: NewService) -> Result<Service, VaultError> {
        let url = required("url", &new.url)?;
        let secret = blob("secret", new.secret)?;
        new.metadata.validate()?;

        let _guard = self.store.write_gate().await;
        self.store.service_group(new.service_group_id).await?;
        if let Some(parent) = new.parent_id {
            self.store.service_group(parent).await?;
        }

        let now = Utc::now();
        let service = Service {
            id: ServiceId::generate(),
            service_group_id: new.service_group_id,
            parent_id: new.parent_id,
            url,
            secret,
            metadata: new.metadata,
            notes: optional(new.notes),
            key_generation: 1,
            created_at: now,
            updated_at: now,
        };

        let mut batch = Batch::new();
        batch.put_service(&service, None)?;
        self.store.commit(batch).await?;

        info!(service = %service.id, service_group = %service.service_group_id, "service created");
        Ok(service)
    }

    /// # Errors
    ///
    /// [`VaultError::NotFound`] if no such service exists.
    pub async fn service(&self, id: ServiceId) -> Result<Service, VaultError> {
        self.store.service(id).await
    }

    /// Services ordered by creation time, optionally limited to one owning
    /// service group.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown service group.
    pub async fn services(
        &self,
        service_group: Option<ServiceGroupId>,
    ) -> Result<Vec<Service>, VaultError> {
        let _guard = self.store.read_gate().await;
        let mut services = match service_group {
            Some(sg) => {
                self.store.service_group(sg).await?;
                let ids: Vec<ServiceId> =
                    self.store.index(&keys::service_group_services(sg)).await?;
                let mut services = Vec::with_capacity(ids.len());
                for id in ids {
                    services.push(self.store.service(id).await?);
                }
                services
            }
            None => self.store.scan(keys::SERVICES).await?,
        };
        services.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(services)
    }

    /// Update a service's descriptive fields or secret ciphertext.
    ///
    /// A new `secret` must be encrypted under the current service key; the
    /// key generation does not change.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown parent service group,
    /// [`VaultError::Invalid`] for a blank url or secret.
    pub async fn update_service(
        &self,
        id: ServiceId,
        changes: ServiceUpdate,
    ) -> Result<Service, VaultError> {
        if let Some(metadata) = &changes.metadata {
            metadata.validate()?;
        }

        let _guard = self.store.write_gate().await;
        let mut service = self.store.service(id).await?;
        let previous_parent = service.parent_id;

        if let Some(parent) = changes.parent_id {
            if let Some(parent) = parent {
                self.store.service_group(parent).await?;
            }
            service.parent_id = parent;
        }
        if let Some(url) = changes.url {
            service.url = required("url", &url)?;
        }
        if let Some(secret) = changes.secret {
            service.secret = blob("secret", secret)?;
        }
        if let Some(metadata) = changes.metadata {
            service.metadata = metadata;
        }
        apply_optional(&mut service.notes, changes.notes);
        service.updated_at = Utc::now();

        let mut batch = Batch::new();
        batch.put_service(&service, previous_parent)?;
        self.store.commit(batch).await?;

        info!(service = %id, "service updated");
        Ok(service)
    }

    /// Delete a service.
    ///
    /// # Errors
    ///
    /// [`VaultError::ServiceInUse`] under [`DeletePolicy::Restrict`] while
    /// any grant references the service.
    pub async fn delete_service(&self, actor: Actor, id: ServiceId) -> Result<(), VaultError> {
        let _guard = self.store.write_gate().await;
        let service = self.store.service(id).await?;

        let mut batch = Batch::new();
        let grants = cascade::remove_service(&self.store, &service, &mut batch).await?;
        if self.policy == DeletePolicy::Restrict && grants > 0 {
            return Err(VaultError::ServiceInUse {
                service: id,
                grants,
            });
        }

        let entry = AuditEntry::new(
            actor,
            AuditAction::DeleteService,
            keys::service(id),
            serde_json::json!({ "service_group": service.service_group_id, "grants": grants }),
        );
        self.store.commit_audited(&self.audit, &entry, batch).await?;

        info!(service = %id, grants, "service deleted");
        Ok(())
    }

    async fn service_groups_of(&self, customer: CustomerId) -> Result<Vec<ServiceGroup>, VaultError> {
        let ids: Vec<ServiceGroupId> = self
            .store
            .index(&keys::customer_service_groups(customer))
            .await?;
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            groups.push(self.store.service_group(id).await?);
        }
        Ok(groups)
    }

    /// Validate a prospective parent link for `child` (`None` when the child
    /// does not exist yet).
    async fn check_parent(
        &self,
        customer: CustomerId,
        parent: ServiceGroupId,
        child: Option<ServiceGroupId>,
    ) -> Result<(), VaultError> {
        let mut seen = BTreeSet::new();
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if Some(id) == child {
                return Err(VaultError::invalid(format!(
                    "service group {parent} cannot be a parent: it would create a cycle"
                )));
            }
            if !seen.insert(id) {
                return Err(VaultError::invalid(format!(
                    "parent chain of service group {parent} is cyclic"
                )));
            }
            let sg = self.store.service_group(id).await?;
            if id == parent && sg.customer_id != customer {
                return Err(VaultError::invalid(format!(
                    "parent service group {parent} belongs to another customer"
                )));
            }
            cursor = sg.parent_id;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::model::AccountFilter;
    use crate::vault::testing::{
        grant, memory_vault, memory_vault_with, new_account, new_group, new_service_group,
        service_in,
    };

    #[tokio::test]
    async fn customer_requires_name_and_lists_by_name() {
        let vault = memory_vault();
        assert!(matches!(
            vault
                .assets
                .create_customer(NewCustomer {
                    name: "   ".into(),
                    created_by: None,
                })
                .await,
            Err(VaultError::Invalid { .. })
        ));

        for name in ["zeta", "acme"] {
            vault
                .assets
                .create_customer(NewCustomer {
                    name: name.into(),
                    created_by: None,
                })
                .await
                .unwrap();
        }
        let names: Vec<_> = vault
            .assets
            .customers()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["acme", "zeta"]);
    }

    #[tokio::test]
    async fn deleting_creator_clears_created_by() {
        let vault = memory_vault();
        let alice = vault.accounts.register(new_account("alice")).await.unwrap();
        let acme = vault
            .assets
            .create_customer(NewCustomer {
                name: "acme".into(),
                created_by: Some(alice.id),
            })
            .await
            .unwrap();

        vault.accounts.delete(Actor::System, alice.id).await.unwrap();

        let acme = vault.assets.customer(acme.id).await.unwrap();
        assert_eq!(acme.created_by, None);
        assert!(
            vault
                .accounts
                .list(&AccountFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn parent_links_must_stay_acyclic() {
        let vault = memory_vault();
        let root = new_service_group(&vault, "root").await;
        let child = vault
            .assets
            .create_service_group(NewServiceGroup {
                parent_id: Some(root.id),
                ..blank_group(root.customer_id, "child")
            })
            .await
            .unwrap();
        let grandchild = vault
            .assets
            .create_service_group(NewServiceGroup {
                parent_id: Some(child.id),
                ..blank_group(root.customer_id, "grandchild")
            })
            .await
            .unwrap();

        let err = vault
            .assets
            .update_service_group(
                root.id,
                ServiceGroupUpdate {
                    parent_id: Some(Some(grandchild.id)),
                    ..ServiceGroupUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Invalid { .. }));

        let err = vault
            .assets
            .update_service_group(
                root.id,
                ServiceGroupUpdate {
                    parent_id: Some(Some(root.id)),
                    ..ServiceGroupUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Invalid { .. }));

        // Detaching and re-parenting elsewhere is fine.
        let moved = vault
            .assets
            .update_service_group(
                grandchild.id,
                ServiceGroupUpdate {
                    parent_id: Some(Some(root.id)),
                    ..ServiceGroupUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.parent_id, Some(root.id));
    }

    #[tokio::test]
    async fn parent_must_share_customer() {
        let vault = memory_vault();
        let here = new_service_group(&vault, "here").await;
        let there = new_service_group(&vault, "there").await;
        let err = vault
            .assets
            .create_service_group(NewServiceGroup {
                parent_id: Some(there.id),
                ..blank_group(here.customer_id, "child")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Invalid { .. }));
    }

    #[tokio::test]
    async fn deleting_service_group_cascades_services_and_grants() {
        let vault = memory_vault();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let web = new_service_group(&vault, "web").await;
        let db1 = service_in(&vault, web.id, "db1").await;
        let db2 = service_in(&vault, web.id, "db2").await;
        vault
            .grants
            .grant(Actor::System, grant(ops.id, db1.id))
            .await
            .unwrap();

        vault
            .assets
            .delete_service_group(Actor::System, web.id)
            .await
            .unwrap();

        for id in [db1.id, db2.id] {
            assert!(matches!(
                vault.assets.service(id).await,
                Err(VaultError::NotFound { .. })
            ));
        }
        assert!(vault.grants.services_for_group(ops.id).await.unwrap().is_empty());
        assert!(
            vault
                .assets
                .service_groups(Some(web.customer_id))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn deleting_service_group_detaches_dependents() {
        let vault = memory_vault();
        let parent = new_service_group(&vault, "parent").await;
        let child = vault
            .assets
            .create_service_group(NewServiceGroup {
                parent_id: Some(parent.id),
                ..blank_group(parent.customer_id, "child")
            })
            .await
            .unwrap();
        let other = new_service_group(&vault, "other").await;
        let linked = vault
            .assets
            .create_service(NewService {
                service_group_id: other.id,
                parent_id: Some(parent.id),
                url: "ssh://linked".into(),
                secret: "ct".into(),
                metadata: Metadata::new(),
                notes: None,
            })
            .await
            .unwrap();

        vault
            .assets
            .delete_service_group(Actor::System, parent.id)
            .await
            .unwrap();

        let child = vault.assets.service_group(child.id).await.unwrap();
        assert_eq!(child.parent_id, None);
        let linked = vault.assets.service(linked.id).await.unwrap();
        assert_eq!(linked.parent_id, None);
        assert_eq!(linked.service_group_id, other.id);
    }

    #[tokio::test]
    async fn deleting_customer_removes_whole_tree() {
        let vault = memory_vault();
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let root = new_service_group(&vault, "root").await;
        let nested = vault
            .assets
            .create_service_group(NewServiceGroup {
                parent_id: Some(root.id),
                ..blank_group(root.customer_id, "nested")
            })
            .await
            .unwrap();
        let svc = service_in(&vault, nested.id, "db").await;
        vault
            .grants
            .grant(Actor::System, grant(ops.id, svc.id))
            .await
            .unwrap();

        vault
            .assets
            .delete_customer(Actor::System, root.customer_id)
            .await
            .unwrap();

        assert!(vault.assets.service_groups(None).await.unwrap().is_empty());
        assert!(vault.assets.services(None).await.unwrap().is_empty());
        assert!(vault.grants.services_for_group(ops.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn services_filter_by_owning_group() {
        let vault = memory_vault();
        let web = new_service_group(&vault, "web").await;
        let batch = new_service_group(&vault, "batch").await;
        let first = service_in(&vault, web.id, "b-first").await;
        let second = service_in(&vault, web.id, "a-second").await;
        service_in(&vault, batch.id, "cron").await;

        let ids: Vec<_> = vault
            .assets
            .services(Some(web.id))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
        assert_eq!(vault.assets.services(None).await.unwrap().len(), 3);
        assert!(matches!(
            vault.assets.services(Some(ServiceGroupId::generate())).await,
            Err(VaultError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn service_update_moves_parent_link() {
        let vault = memory_vault();
        let web = new_service_group(&vault, "web").await;
        let tagged = new_service_group(&vault, "tagged").await;
        let svc = service_in(&vault, web.id, "db").await;

        let updated = vault
            .assets
            .update_service(
                svc.id,
                ServiceUpdate {
                    parent_id: Some(Some(tagged.id)),
                    notes: Some("primary".into()),
                    ..ServiceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.parent_id, Some(tagged.id));
        assert_eq!(updated.key_generation, 1);

        // Deleting the tag group only clears the link.
        vault
            .assets
            .delete_service_group(Actor::System, tagged.id)
            .await
            .unwrap();
        let svc = vault.assets.service(svc.id).await.unwrap();
        assert_eq!(svc.parent_id, None);
        assert_eq!(svc.notes.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn restrict_delete_refuses_granted_service() {
        let vault = memory_vault_with(DeletePolicy::Restrict);
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let web = new_service_group(&vault, "web").await;
        let svc = service_in(&vault, web.id, "db").await;
        vault
            .grants
            .grant(Actor::System, grant(ops.id, svc.id))
            .await
            .unwrap();

        let err = vault
            .assets
            .delete_service(Actor::System, svc.id)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ServiceInUse { grants: 1, .. }));
        vault.assets.service(svc.id).await.unwrap();
    }

    #[tokio::test]
    async fn restrict_delete_covers_services_under_their_owners() {
        let vault = memory_vault_with(DeletePolicy::Restrict);
        let ops = vault.groups.create(new_group("ops")).await.unwrap();
        let web = new_service_group(&vault, "web").await;
        let svc = service_in(&vault, web.id, "db1").await;
        vault
            .grants
            .grant(Actor::System, grant(ops.id, svc.id))
            .await
            .unwrap();

        let err = vault
            .assets
            .delete_service_group(Actor::System, web.id)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ServiceInUse { grants: 1, .. }));

        let err = vault
            .assets
            .delete_customer(Actor::System, web.customer_id)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ServiceInUse { grants: 1, .. }));

        vault.assets.service_group(web.id).await.unwrap();
        vault.assets.customer(web.customer_id).await.unwrap();
        assert_eq!(vault.grants.services_for_group(ops.id).await.unwrap().len(), 1);

        // Once the grant is gone the owners may go too.
        vault
            .grants
            .revoke(Actor::System, ops.id, svc.id)
            .await
            .unwrap();
        vault
            .assets
            .delete_customer(Actor::System, web.customer_id)
            .await
            .unwrap();
        assert!(matches!(
            vault.assets.service(svc.id).await,
            Err(VaultError::NotFound { .. })
        ));
    }

    fn blank_group(customer_id: CustomerId, name: &str) -> NewServiceGroup {
        NewServiceGroup {
            customer_id,
            parent_id: None,
            name: name.into(),
            fqdn: None,
            ip: None,
            location: None,
            notes: None,
        }
    }
}
