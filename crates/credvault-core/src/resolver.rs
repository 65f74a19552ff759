//! Access resolution.
//!
//! An account reaches a service through exactly one hop:
//!
//! ```text
//! account private key
//!   └─ membership.wrapped_group_key  → group private key
//!        └─ grant.wrapped_service_key → service symmetric key
//!             └─ service.secret       → plaintext (client side)
//! ```
//!
//! Only membership and grant rows are consulted. Groups do not nest and the
//! service group hierarchy plays no part. Every call reads storage afresh,
//! so a committed revocation is visible to the very next resolution.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::VaultError;
use crate::ids::{AccountId, GroupId, ServiceId};
use crate::model::Service;
use crate::store::Store;

/// The blobs a client unwraps, in order, to read one service's secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappingPath {
    /// Group private key, wrapped for the account.
    pub wrapped_group_key: String,
    pub group_key_generation: u64,
    /// Service key, wrapped for the group.
    pub wrapped_service_key: String,
    pub service_key_generation: u64,
    /// Secret ciphertext under the service key.
    pub secret: String,
}

impl WrappingPath {
    /// The two wrapped keys, outermost first.
    #[must_use]
    pub fn blobs(&self) -> [&str; 2] {
        [&self.wrapped_group_key, &self.wrapped_service_key]
    }
}

/// One service reachable by an account, via one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub service_id: ServiceId,
    pub service_url: String,
    pub group_id: GroupId,
    pub group_name: String,
    pub path: WrappingPath,
}

/// Answers "what can this account reach, and how?".
#[derive(Debug)]
pub struct AccessResolver {
    store: Arc<Store>,
}

impl AccessResolver {
    pub(crate) fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Every (service, group) path available to `account`, ordered by
    /// service then group. A service reachable through several groups
    /// appears once per group.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown account.
    pub async fn resolve(&self, account: AccountId) -> Result<Vec<AccessEntry>, VaultError> {
        self.collect(account, None).await
    }

    /// The paths from `account` to one service. Empty when unreachable.
    ///
    /// # Errors
    ///
    /// [`VaultError::NotFound`] for an unknown account or service.
    pub async fn resolve_service(
        &self,
        account: AccountId,
        service: ServiceId,
    ) -> Result<Vec<AccessEntry>, VaultError> {
        self.collect(account, Some(service)).await
    }

    async fn collect(
        &self,
        account: AccountId,
        only: Option<ServiceId>,
    ) -> Result<Vec<AccessEntry>, VaultError> {
        let _guard = self.store.read_gate().await;
        self.store.account(account).await?;
        if let Some(service) = only {
            self.store.service(service).await?;
        }

        let mut services: BTreeMap<ServiceId, Service> = BTreeMap::new();
        let mut entries = Vec::new();

        for group_id in self.store.group_ids_of(account).await? {
            let Some(membership) = self.store.membership(group_id, account).await? else {
                warn!(%account, group = %group_id, "membership index points at a missing row");
                continue;
            };
            let group = self.store.group(group_id).await?;

            let reachable = match only {
                Some(service) => vec![service],
                None => self.store.service_ids_of_group(group_id).await?,
            };
            for service_id in reachable {
                let Some(grant) = self.store.grant(group_id, service_id).await? else {
                    continue;
                };
                let service = match services.entry(service_id) {
                    Entry::Occupied(cached) => cached.into_mut(),
                    Entry::Vacant(slot) => slot.insert(self.store.service(service_id).await?),
                };
                entries.push(AccessEntry {
                    service_id,
                    service_url: service.url.clone(),
                    group_id,
                    group_name: group.name.clone(),
                    path: WrappingPath {
                        wrapped_group_key: membership.wrapped_group_key.clone(),
                        group_key_generation: membership.key_generation,
                        wrapped_service_key: grant.wrapped_service_key,
                        service_key_generation: grant.key_generation,
                        secret: service.secret.clone(),
                    },
                });
            }
        }

        entries.sort_by(|a, b| {
            a.service_id
                .cmp(&b.service_id)
                .then(a.group_id.cmp(&b.group_id))
        });
        debug!(%account, paths = entries.len(), "access resolved");
        Ok(entries)
    }
}
