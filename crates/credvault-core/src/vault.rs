//! The assembled vault graph.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use credvault_storage::StorageBackend;
use serde::{Deserialize, Serialize};

use crate::assets::AssetHierarchy;
use crate::audit::AuditManager;
use crate::grants::GrantLedger;
use crate::groups::GroupDirectory;
use crate::identity::IdentityRegistry;
use crate::membership::MembershipLedger;
use crate::resolver::AccessResolver;
use crate::store::Store;

/// What happens to memberships and grants when a group or service that
/// they reference is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Remove dependents in the same batch.
    #[default]
    Cascade,
    /// Refuse the delete while dependents exist.
    Restrict,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" => Ok(Self::Cascade),
            "restrict" => Ok(Self::Restrict),
            other => Err(format!(
                "unknown delete policy '{other}', expected 'cascade' or 'restrict'"
            )),
        }
    }
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cascade => "cascade",
            Self::Restrict => "restrict",
        })
    }
}

/// Behavioral settings for a [`Vault`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VaultConfig {
    pub delete_policy: DeletePolicy,
}

/// Every ledger over one shared store.
///
/// All components serialize their writes through the same store gate, so
/// an operation on one never interleaves with an operation on another.
#[derive(Debug)]
pub struct Vault {
    pub accounts: IdentityRegistry,
    pub groups: GroupDirectory,
    pub memberships: MembershipLedger,
    pub assets: AssetHierarchy,
    pub grants: GrantLedger,
    pub resolver: AccessResolver,
    audit: Arc<AuditManager>,
}

impl Vault {
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        audit: Arc<AuditManager>,
        config: VaultConfig,
    ) -> Self {
        let store = Arc::new(Store::new(backend));
        let policy = config.delete_policy;
        Self {
            accounts: IdentityRegistry::new(Arc::clone(&store), Arc::clone(&audit)),
            groups: GroupDirectory::new(Arc::clone(&store), Arc::clone(&audit), policy),
            memberships: MembershipLedger::new(Arc::clone(&store), Arc::clone(&audit)),
            assets: AssetHierarchy::new(Arc::clone(&store), Arc::clone(&audit), policy),
            grants: GrantLedger::new(Arc::clone(&store), Arc::clone(&audit)),
            resolver: AccessResolver::new(store),
            audit,
        }
    }

    /// The audit manager shared by every component.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditManager> {
        &self.audit
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn delete_policy_parses() {
        assert_eq!("cascade".parse::<DeletePolicy>().unwrap(), DeletePolicy::Cascade);
        assert_eq!(" Restrict ".parse::<DeletePolicy>().unwrap(), DeletePolicy::Restrict);
        assert!("soft".parse::<DeletePolicy>().is_err());
        assert_eq!(DeletePolicy::default().to_string(), "cascade");
    }
}
