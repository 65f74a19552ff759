//! Record layout on top of a [`StorageBackend`].
//!
//! Records are JSON documents; relationships are mirrored by empty-valued
//! index keys so both directions of every edge can be listed by prefix:
//!
//! ```text
//! accounts/{account}                accounts_by_username/{username}
//! groups/{group}
//! memberships/{group}/{account}     index/account_groups/{account}/{group}
//! customers/{customer}              index/creator_customers/{account}/{customer}
//! service_groups/{sg}               index/customer_service_groups/{customer}/{sg}
//!                                   index/service_group_children/{parent}/{sg}
//! services/{service}                index/service_group_services/{sg}/{service}
//!                                   index/parent_services/{sg}/{service}
//! grants/{service}/{group}          index/group_grants/{group}/{service}
//! ```
//!
//! A row and its index keys are always written in the same [`Batch`], so the
//! two views never disagree.
//!
//! # Isolation
//!
//! Mutations hold the write side of the store's gate from their first read
//! until the batch commits, so validation and commit see the same state.
//! Multi-read queries (listings, the resolver) hold the read side and
//! therefore never observe the middle of another operation.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use credvault_storage::{BatchOp, StorageBackend};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::audit::{AuditEntry, AuditManager};
use crate::error::VaultError;
use crate::ids::{AccountId, CustomerId, GroupId, ServiceGroupId, ServiceId};
use crate::model::{
    Account, AccountGroup, Customer, Grant, GroupMembership, Service, ServiceGroup,
};

pub(crate) mod keys {
    use crate::ids::{AccountId, CustomerId, GroupId, ServiceGroupId, ServiceId};

    pub const ACCOUNTS: &str = "accounts/";
    pub const GROUPS: &str = "groups/";
    pub const CUSTOMERS: &str = "customers/";
    pub const SERVICE_GROUPS: &str = "service_groups/";
    pub const SERVICES: &str = "services/";

    pub fn account(id: AccountId) -> String {
        format!("accounts/{id}")
    }

    pub fn username(name: &str) -> String {
        format!("accounts_by_username/{name}")
    }

    pub fn group(id: GroupId) -> String {
        format!("groups/{id}")
    }

    pub fn membership(group: GroupId, account: AccountId) -> String {
        format!("memberships/{group}/{account}")
    }

    pub fn memberships_of(group: GroupId) -> String {
        format!("memberships/{group}/")
    }

    pub fn account_group(account: AccountId, group: GroupId) -> String {
        format!("index/account_groups/{account}/{group}")
    }

    pub fn account_groups(account: AccountId) -> String {
        format!("index/account_groups/{account}/")
    }

    pub fn customer(id: CustomerId) -> String {
        format!("customers/{id}")
    }

    pub fn creator_customer(account: AccountId, customer: CustomerId) -> String {
        format!("index/creator_customers/{account}/{customer}")
    }

    pub fn creator_customers(account: AccountId) -> String {
        format!("index/creator_customers/{account}/")
    }

    pub fn service_group(id: ServiceGroupId) -> String {
        format!("service_groups/{id}")
    }

    pub fn customer_service_group(customer: CustomerId, sg: ServiceGroupId) -> String {
        format!("index/customer_service_groups/{customer}/{sg}")
    }

    pub fn customer_service_groups(customer: CustomerId) -> String {
        format!("index/customer_service_groups/{customer}/")
    }

    pub fn service_group_child(parent: ServiceGroupId, child: ServiceGroupId) -> String {
        format!("index/service_group_children/{parent}/{child}")
    }

    pub fn service_group_children(parent: ServiceGroupId) -> String {
        format!("index/service_group_children/{parent}/")
    }

    pub fn service(id: ServiceId) -> String {
        format!("services/{id}")
    }

    pub fn service_group_service(sg: ServiceGroupId, service: ServiceId) -> String {
        format!("index/service_group_services/{sg}/{service}")
    }

    pub fn service_group_services(sg: ServiceGroupId) -> String {
        format!("index/service_group_services/{sg}/")
    }

    pub fn parent_service(sg: ServiceGroupId, service: ServiceId) -> String {
        format!("index/parent_services/{sg}/{service}")
    }

    pub fn parent_services(sg: ServiceGroupId) -> String {
        format!("index/parent_services/{sg}/")
    }

    pub fn grant(service: ServiceId, group: GroupId) -> String {
        format!("grants/{service}/{group}")
    }

    pub fn grants_of(service: ServiceId) -> String {
        format!("grants/{service}/")
    }

    pub fn group_grant(group: GroupId, service: ServiceId) -> String {
        format!("index/group_grants/{group}/{service}")
    }

    pub fn group_grants(group: GroupId) -> String {
        format!("index/group_grants/{group}/")
    }
}

/// A set of writes committed together through [`StorageBackend::apply`].
#[derive(Debug, Default)]
pub(crate) struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put<T: Serialize>(&mut self, key: String, record: &T) -> Result<(), VaultError> {
        let value = serde_json::to_vec(record).map_err(|e| VaultError::Serialization {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.ops.push(BatchOp::Put { key, value });
        Ok(())
    }

    /// Write an empty index marker.
    pub(crate) fn mark(&mut self, key: String) {
        self.ops.push(BatchOp::Put {
            key,
            value: Vec::new(),
        });
    }

    pub(crate) fn delete(&mut self, key: String) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // ── Row + index helpers ──────────────────────────────────────────

    pub(crate) fn put_membership(&mut self, m: &GroupMembership) -> Result<(), VaultError> {
        self.put(keys::membership(m.group_id, m.account_id), m)?;
        self.mark(keys::account_group(m.account_id, m.group_id));
        Ok(())
    }

    pub(crate) fn delete_membership(&mut self, group: GroupId, account: AccountId) {
        self.delete(keys::membership(group, account));
        self.delete(keys::account_group(account, group));
    }

    pub(crate) fn put_grant(&mut self, g: &Grant) -> Result<(), VaultError> {
        self.put(keys::grant(g.service_id, g.group_id), g)?;
        self.mark(keys::group_grant(g.group_id, g.service_id));
        Ok(())
    }

    pub(crate) fn delete_grant(&mut self, group: GroupId, service: ServiceId) {
        self.delete(keys::grant(service, group));
        self.delete(keys::group_grant(group, service));
    }

    pub(crate) fn put_service(
        &mut self,
        service: &Service,
        previous_parent: Option<ServiceGroupId>,
    ) -> Result<(), VaultError> {
        self.put(keys::service(service.id), service)?;
        self.mark(keys::service_group_service(service.service_group_id, service.id));
        if previous_parent != service.parent_id {
            if let Some(old) = previous_parent {
                self.delete(keys::parent_service(old, service.id));
            }
        }
        if let Some(parent) = service.parent_id {
            self.mark(keys::parent_service(parent, service.id));
        }
        Ok(())
    }

    pub(crate) fn put_service_group(
        &mut self,
        sg: &ServiceGroup,
        previous_parent: Option<ServiceGroupId>,
    ) -> Result<(), VaultError> {
        self.put(keys::service_group(sg.id), sg)?;
        self.mark(keys::customer_service_group(sg.customer_id, sg.id));
        if previous_parent != sg.parent_id {
            if let Some(old) = previous_parent {
                self.delete(keys::service_group_child(old, sg.id));
            }
        }
        if let Some(parent) = sg.parent_id {
            self.mark(keys::service_group_child(parent, sg.id));
        }
        Ok(())
    }

    fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Typed access to the record layout, shared by every ledger.
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    gate: RwLock<()>,
}

impl Store {
    /// Wrap a storage backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            gate: RwLock::new(()),
        }
    }

    pub(crate) async fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    pub(crate) async fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, VaultError> {
        match self.backend.get(key).await? {
            None => Ok(None),
            Some(bytes) => decode(key, &bytes).map(Some),
        }
    }

    async fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        entity: &'static str,
        id: impl Display,
    ) -> Result<T, VaultError> {
        self.get(key)
            .await?
            .ok_or_else(|| VaultError::not_found(entity, id))
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool, VaultError> {
        Ok(self.backend.exists(key).await?)
    }

    /// Decode every record directly under `prefix`.
    pub(crate) async fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, VaultError> {
        self.backend
            .scan(prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| decode(&key, &bytes))
            .collect()
    }

    /// Parse the trailing id of every index key under `prefix`.
    pub(crate) async fn index<I: FromStr>(&self, prefix: &str) -> Result<Vec<I>, VaultError> {
        let keys = self.backend.list(prefix).await?;
        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let tail = key.strip_prefix(prefix).unwrap_or(&key);
            match tail.parse() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(key = %key, "skipping malformed index key"),
            }
        }
        Ok(ids)
    }

    /// Commit a batch atomically.
    pub(crate) async fn commit(&self, batch: Batch) -> Result<(), VaultError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.backend.apply(batch.into_ops()).await?;
        Ok(())
    }

    /// Write the audit entry, then commit. A refused audit write aborts the
    /// mutation; a failed commit is recorded as a second entry.
    pub(crate) async fn commit_audited(
        &self,
        audit: &AuditManager,
        entry: &AuditEntry,
        batch: Batch,
    ) -> Result<(), VaultError> {
        audit.log(entry).await?;
        if let Err(e) = self.commit(batch).await {
            audit.log_failure(entry, &e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    // ── Typed lookups ────────────────────────────────────────────────

    pub(crate) async fn account(&self, id: AccountId) -> Result<Account, VaultError> {
        self.load(&keys::account(id), "account", id).await
    }

    pub(crate) async fn group(&self, id: GroupId) -> Result<AccountGroup, VaultError> {
        self.load(&keys::group(id), "group", id).await
    }

    pub(crate) async fn customer(&self, id: CustomerId) -> Result<Customer, VaultError> {
        self.load(&keys::customer(id), "customer", id).await
    }

    pub(crate) async fn service_group(&self, id: ServiceGroupId) -> Result<ServiceGroup, VaultError> {
        self.load(&keys::service_group(id), "service group", id).await
    }

    pub(crate) async fn service(&self, id: ServiceId) -> Result<Service, VaultError> {
        self.load(&keys::service(id), "service", id).await
    }

    pub(crate) async fn membership(
        &self,
        group: GroupId,
        account: AccountId,
    ) -> Result<Option<GroupMembership>, VaultError> {
        self.get(&keys::membership(group, account)).await
    }

    pub(crate) async fn memberships_of_group(
        &self,
        group: GroupId,
    ) -> Result<Vec<GroupMembership>, VaultError> {
        self.scan(&keys::memberships_of(group)).await
    }

    pub(crate) async fn group_ids_of(&self, account: AccountId) -> Result<Vec<GroupId>, VaultError> {
        self.index(&keys::account_groups(account)).await
    }

    pub(crate) async fn grant(
        &self,
        group: GroupId,
        service: ServiceId,
    ) -> Result<Option<Grant>, VaultError> {
        self.get(&keys::grant(service, group)).await
    }

    pub(crate) async fn grants_of_service(&self, service: ServiceId) -> Result<Vec<Grant>, VaultError> {
        self.scan(&keys::grants_of(service)).await
    }

    pub(crate) async fn service_ids_of_group(
        &self,
        group: GroupId,
    ) -> Result<Vec<ServiceId>, VaultError> {
        self.index(&keys::group_grants(group)).await
    }

    pub(crate) async fn grants_of_group(&self, group: GroupId) -> Result<Vec<Grant>, VaultError> {
        let mut grants = Vec::new();
        for service in self.service_ids_of_group(group).await? {
            match self.grant(group, service).await? {
                Some(grant) => grants.push(grant),
                None => warn!(%group, %service, "grant index points at a missing grant"),
            }
        }
        Ok(grants)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, VaultError> {
    serde_json::from_slice(bytes).map_err(|e| VaultError::Serialization {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use credvault_storage::{BatchOp, MemoryBackend, StorageBackend, StorageError};

    /// A memory backend whose batch commits can be made to fail.
    #[derive(Default)]
    pub(crate) struct FaultyBackend {
        inner: MemoryBackend,
        fail_apply: AtomicBool,
    }

    impl FaultyBackend {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn arm(&self) {
            self.fail_apply.store(true, Ordering::SeqCst);
        }

        pub(crate) fn disarm(&self) {
            self.fail_apply.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl StorageBackend for FaultyBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix).await
        }

        async fn apply(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
            if self.fail_apply.load(Ordering::SeqCst) {
                return Err(StorageError::Transaction {
                    reason: format!("injected fault ({} ops dropped)", ops.len()),
                });
            }
            self.inner.apply(ops).await
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use credvault_storage::MemoryBackend;

    use super::*;

    fn membership(group: GroupId, account: AccountId) -> GroupMembership {
        GroupMembership {
            account_id: account,
            group_id: group,
            is_admin: false,
            wrapped_group_key: "blob".to_owned(),
            key_generation: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn membership_row_and_index_move_together() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let (group, account) = (GroupId::generate(), AccountId::generate());

        let mut batch = Batch::new();
        batch.put_membership(&membership(group, account)).unwrap();
        store.commit(batch).await.unwrap();

        assert!(store.membership(group, account).await.unwrap().is_some());
        assert_eq!(store.group_ids_of(account).await.unwrap(), vec![group]);

        let mut batch = Batch::new();
        batch.delete_membership(group, account);
        store.commit(batch).await.unwrap();

        assert!(store.membership(group, account).await.unwrap().is_none());
        assert!(store.group_ids_of(account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let err = store.group(GroupId::generate()).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound { entity: "group", .. }));
    }

    #[tokio::test]
    async fn malformed_index_keys_are_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        let account = AccountId::generate();
        let group = GroupId::generate();
        backend
            .put(&keys::account_group(account, group), b"")
            .await
            .unwrap();
        backend
            .put(&format!("{}not-a-uuid", keys::account_groups(account)), b"")
            .await
            .unwrap();

        let store = Store::new(backend);
        assert_eq!(store.group_ids_of(account).await.unwrap(), vec![group]);
    }

    #[tokio::test]
    async fn entity_prefixes_do_not_overlap() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let mut batch = Batch::new();
        batch.mark(keys::username("alice"));
        batch.mark(keys::service_group(ServiceGroupId::generate()));
        store.commit(batch).await.unwrap();

        let accounts: Vec<Account> = store.scan(keys::ACCOUNTS).await.unwrap();
        let services: Vec<Service> = store.scan(keys::SERVICES).await.unwrap();
        assert!(accounts.is_empty());
        assert!(services.is_empty());
    }
}
