//! Shared application state for `CredVault` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::collections::BTreeSet;
use std::sync::Arc;

use credvault_core::Vault;
use credvault_core::ids::AccountId;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The account/group/service graph.
    pub vault: Arc<Vault>,
    /// Accounts allowed to perform every operation.
    pub superusers: BTreeSet<AccountId>,
}

impl AppState {
    #[must_use]
    pub fn new(vault: Arc<Vault>, superusers: BTreeSet<AccountId>) -> Self {
        Self { vault, superusers }
    }

    #[must_use]
    pub fn is_superuser(&self, account: AccountId) -> bool {
        self.superusers.contains(&account)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("superusers", &self.superusers.len())
            .finish_non_exhaustive()
    }
}
