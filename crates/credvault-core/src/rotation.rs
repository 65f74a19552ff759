//! Key rotation requests.
//!
//! A rotation replaces a key and every blob wrapped with it in one batch.
//! The caller re-wraps client-side and submits one blob per dependent row;
//! the supplied maps must cover the current rows exactly. Anything missing,
//! unknown, or empty rejects the whole rotation before a single write.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::ids::{AccountId, GroupId, ServiceId};

/// New group keypair material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupKeyRotation {
    /// The group's new public key.
    pub public_key: String,
    /// The new group private key wrapped for each member.
    pub member_keys: BTreeMap<AccountId, String>,
    /// Each granted service key, re-wrapped for the new group public key.
    #[serde(default)]
    pub grant_keys: BTreeMap<ServiceId, String>,
}

/// A new service key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceKeyRotation {
    /// The secret re-encrypted under the new service key.
    pub secret: String,
    /// The new service key wrapped for each granted group.
    #[serde(default)]
    pub grant_keys: BTreeMap<GroupId, String>,
}

/// A new account keypair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountKeyRotation {
    pub public_key: String,
    /// Each group private key, re-wrapped for the new account public key.
    #[serde(default)]
    pub group_keys: BTreeMap<GroupId, String>,
}

/// Check that `supplied` names exactly the ids in `current` and that no blob
/// is empty.
pub(crate) fn ensure_exact_cover<K: Ord + Copy + Display>(
    what: &str,
    current: &BTreeSet<K>,
    supplied: &BTreeMap<K, String>,
) -> Result<(), VaultError> {
    if let Some(missing) = current.iter().find(|id| !supplied.contains_key(id)) {
        return Err(VaultError::partial_rotation(format!(
            "no new {what} supplied for {missing}"
        )));
    }
    if let Some(unknown) = supplied.keys().find(|id| !current.contains(id)) {
        return Err(VaultError::partial_rotation(format!(
            "{what} supplied for {unknown}, which is not a current holder"
        )));
    }
    if let Some((id, _)) = supplied.iter().find(|(_, blob)| blob.trim().is_empty()) {
        return Err(VaultError::partial_rotation(format!("empty {what} for {id}")));
    }
    Ok(())
}

/// A rotation that fails to commit has changed nothing, and is reported as
/// such.
pub(crate) fn commit_failure(err: VaultError) -> VaultError {
    match err {
        VaultError::Storage(e) => VaultError::partial_rotation(format!("commit failed: {e}")),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exact_cover_accepts_matching_sets() {
        let a = AccountId::generate();
        let current = BTreeSet::from([a]);
        let supplied = BTreeMap::from([(a, "blob".to_owned())]);
        ensure_exact_cover("wrapped key", &current, &supplied).unwrap();
    }

    #[test]
    fn exact_cover_rejects_missing_extra_and_empty() {
        let (a, b) = (AccountId::generate(), AccountId::generate());
        let current = BTreeSet::from([a, b]);

        let missing = BTreeMap::from([(a, "blob".to_owned())]);
        let err = ensure_exact_cover("wrapped key", &current, &missing).unwrap_err();
        assert!(err.to_string().contains(&b.to_string()));

        let stranger = AccountId::generate();
        let extra = BTreeMap::from([
            (a, "x".to_owned()),
            (b, "y".to_owned()),
            (stranger, "z".to_owned()),
        ]);
        let err = ensure_exact_cover("wrapped key", &current, &extra).unwrap_err();
        assert!(matches!(err, VaultError::PartialRotationFailure { .. }));

        let empty = BTreeMap::from([(a, "x".to_owned()), (b, "  ".to_owned())]);
        assert!(ensure_exact_cover("wrapped key", &current, &empty).is_err());
    }

    #[test]
    fn rotation_request_parses_from_json() {
        let account = AccountId::generate();
        let body = format!(r#"{{"public_key":"pk2","member_keys":{{"{account}":"wrapped"}}}}"#);
        let rotation: GroupKeyRotation = serde_json::from_str(&body).unwrap();
        assert_eq!(rotation.member_keys.get(&account).unwrap(), "wrapped");
        assert!(rotation.grant_keys.is_empty());
    }
}
