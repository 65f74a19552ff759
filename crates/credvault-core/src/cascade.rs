//! Removal planning shared by every delete path.
//!
//! Each planner reads the rows that depend on the entity being removed and
//! appends their deletions (or detachments) to the caller's [`Batch`]. The
//! caller holds the write gate and commits the batch once, so a cascade is
//! applied all-or-nothing.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;

use crate::error::VaultError;
use crate::ids::{ServiceGroupId, ServiceId};
use crate::model::{AccountGroup, Service, ServiceGroup};
use crate::store::{Batch, Store, keys};
use crate::vault::DeletePolicy;

/// Rows removed along with a group.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub(crate) struct GroupRemoval {
    pub memberships: usize,
    pub grants: usize,
}

/// Rows removed or detached along with one or more service groups.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub(crate) struct AssetRemoval {
    pub service_groups: usize,
    pub services: usize,
    pub grants: usize,
    pub detached_service_groups: usize,
    pub detached_services: usize,
}

pub(crate) async fn remove_group(
    store: &Store,
    group: &AccountGroup,
    batch: &mut Batch,
) -> Result<GroupRemoval, VaultError> {
    let memberships = store.memberships_of_group(group.id).await?;
    for m in &memberships {
        batch.delete_membership(m.group_id, m.account_id);
    }
    let services = store.service_ids_of_group(group.id).await?;
    for service in &services {
        batch.delete_grant(group.id, *service);
    }
    batch.delete(keys::group(group.id));

    Ok(GroupRemoval {
        memberships: memberships.len(),
        grants: services.len(),
    })
}

/// Queue a service and its grants for deletion. Returns the grant count.
pub(crate) async fn remove_service(
    store: &Store,
    service: &Service,
    batch: &mut Batch,
) -> Result<usize, VaultError> {
    let grants = store.grants_of_service(service.id).await?;
    for grant in &grants {
        batch.delete_grant(grant.group_id, grant.service_id);
    }
    batch.delete(keys::service(service.id));
    batch.delete(keys::service_group_service(service.service_group_id, service.id));
    if let Some(parent) = service.parent_id {
        batch.delete(keys::parent_service(parent, service.id));
    }
    Ok(grants.len())
}

/// Queue a set of service groups for deletion.
///
/// Owned services go with them. Child service groups and services that only
/// name a doomed group as their parent survive with the link cleared.
/// Under [`DeletePolicy::Restrict`] an owned service that still has grants
/// fails the whole removal with [`VaultError::ServiceInUse`].
pub(crate) async fn remove_service_groups(
    store: &Store,
    doomed: &[ServiceGroup],
    policy: DeletePolicy,
    batch: &mut Batch,
) -> Result<AssetRemoval, VaultError> {
    let doomed_ids: BTreeSet<ServiceGroupId> = doomed.iter().map(|sg| sg.id).collect();
    let mut removal = AssetRemoval::default();
    let mut removed_services = BTreeSet::new();

    for sg in doomed {
        let owned: Vec<ServiceId> = store.index(&keys::service_group_services(sg.id)).await?;
        for service_id in owned {
            let service = store.service(service_id).await?;
            let grants = remove_service(store, &service, batch).await?;
            if policy == DeletePolicy::Restrict && grants > 0 {
                return Err(VaultError::ServiceInUse {
                    service: service_id,
                    grants,
                });
            }
            removal.grants += grants;
            removal.services += 1;
            removed_services.insert(service_id);
        }
    }

    for sg in doomed {
        let children: Vec<ServiceGroupId> =
            store.index(&keys::service_group_children(sg.id)).await?;
        for child_id in children {
            if doomed_ids.contains(&child_id) {
                continue;
            }
            let mut child = store.service_group(child_id).await?;
            child.parent_id = None;
            batch.put_service_group(&child, Some(sg.id))?;
            removal.detached_service_groups += 1;
        }

        let linked: Vec<ServiceId> = store.index(&keys::parent_services(sg.id)).await?;
        for service_id in linked {
            if removed_services.contains(&service_id) {
                continue;
            }
            let mut service = store.service(service_id).await?;
            service.parent_id = None;
            service.updated_at = Utc::now();
            batch.put_service(&service, Some(sg.id))?;
            removal.detached_services += 1;
        }

        batch.delete(keys::service_group(sg.id));
        batch.delete(keys::customer_service_group(sg.customer_id, sg.id));
        if let Some(parent) = sg.parent_id {
            batch.delete(keys::service_group_child(parent, sg.id));
        }
        removal.service_groups += 1;
    }

    Ok(removal)
}
