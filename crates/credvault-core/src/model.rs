//! Persisted records and the inputs that create or change them.
//!
//! Every wrapped-key field holds an opaque blob produced by a vault client.
//! The server stores and returns these verbatim and never interprets them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CustomerId, GroupId, ServiceGroupId, ServiceId};
use crate::metadata::Metadata;

// ── Identity ─────────────────────────────────────────────────────────

/// A human identity holding a keypair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Unique login name; exactly one account exists per username.
    pub username: String,
    pub email: Option<String>,
    pub department: String,
    /// Public key blob. Frozen while any membership is wrapped for it.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering an account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub email: Option<String>,
    pub department: String,
    pub public_key: String,
}

/// Profile changes. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    /// `Some("")` clears the email.
    pub email: Option<String>,
    pub department: Option<String>,
    pub public_key: Option<String>,
}

/// Listing filter for accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Case-insensitive substring match on the username.
    pub username: Option<String>,
    /// Exact department match.
    pub department: Option<String>,
}

// ── Groups & memberships ─────────────────────────────────────────────

/// A named set of accounts sharing a group keypair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: GroupId,
    pub name: String,
    pub public_key: String,
    /// Omitted from default listings; still resolves access normally.
    pub is_hidden: bool,
    /// Starts at 1 and increases with every group key rotation.
    pub key_generation: u64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a group.
#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub public_key: String,
    pub is_hidden: bool,
}

/// Changes to a group. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub is_hidden: Option<bool>,
    /// Only accepted while nothing is wrapped for the group yet.
    pub public_key: Option<String>,
}

/// An account's wrapped copy of a group's private key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub account_id: AccountId,
    pub group_id: GroupId,
    pub is_admin: bool,
    pub wrapped_group_key: String,
    /// The group key generation this blob was wrapped from.
    pub key_generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for adding an account to a group.
#[derive(Debug, Clone)]
pub struct NewMembership {
    pub account_id: AccountId,
    pub group_id: GroupId,
    pub wrapped_group_key: String,
    pub is_admin: bool,
}

/// A group member as listed by the membership ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub account_id: AccountId,
    pub username: String,
    pub is_admin: bool,
    pub key_generation: u64,
}

// ── Asset hierarchy ──────────────────────────────────────────────────

/// The organizational owner of service groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    /// Cleared when the creating account is deleted.
    pub created_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a customer.
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub created_by: Option<AccountId>,
}

/// A named cluster of services, optionally nested under another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub id: ServiceGroupId,
    pub customer_id: CustomerId,
    pub parent_id: Option<ServiceGroupId>,
    pub name: String,
    pub fqdn: Option<String>,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a service group.
#[derive(Debug, Clone)]
pub struct NewServiceGroup {
    pub customer_id: CustomerId,
    pub parent_id: Option<ServiceGroupId>,
    pub name: String,
    pub fqdn: Option<String>,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Descriptive changes to a service group. `None` leaves a field untouched;
/// `Some("")` clears an optional text field.
#[derive(Debug, Clone, Default)]
pub struct ServiceGroupUpdate {
    pub name: Option<String>,
    /// `Some(None)` detaches the group from its parent.
    pub parent_id: Option<Option<ServiceGroupId>>,
    pub fqdn: Option<String>,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// A single managed secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    /// The owning service group; deleting it deletes this service.
    pub service_group_id: ServiceGroupId,
    /// Logical grouping only; never consulted for access decisions.
    pub parent_id: Option<ServiceGroupId>,
    pub url: String,
    /// Secret ciphertext under the service's symmetric key.
    pub secret: String,
    pub metadata: Metadata,
    pub notes: Option<String>,
    /// Starts at 1 and increases with every service key rotation.
    pub key_generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a service.
#[derive(Debug, Clone)]
pub struct NewService {
    pub service_group_id: ServiceGroupId,
    pub parent_id: Option<ServiceGroupId>,
    pub url: String,
    pub secret: String,
    pub metadata: Metadata,
    pub notes: Option<String>,
}

/// Changes to a service. Replacing `secret` keeps the current service key;
/// a new key requires [`rotate_service_key`](crate::grants::GrantLedger::rotate_service_key).
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    pub parent_id: Option<Option<ServiceGroupId>>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub metadata: Option<Metadata>,
    pub notes: Option<String>,
}

// ── Grants ───────────────────────────────────────────────────────────

/// A group's wrapped copy of a service's symmetric key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub group_id: GroupId,
    pub service_id: ServiceId,
    pub wrapped_service_key: String,
    /// The service key generation this blob wraps.
    pub key_generation: u64,
    pub created_at: DateTime<Utc>,
}

/// Input for granting a group access to a service.
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub group_id: GroupId,
    pub service_id: ServiceId,
    pub wrapped_service_key: String,
}

/// Trim a required text field, rejecting blanks.
pub(crate) fn required(field: &str, value: &str) -> Result<String, crate::error::VaultError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::error::VaultError::invalid(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Normalize optional text: blank becomes `None`.
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    })
}

/// Apply an optional-text change in place.
pub(crate) fn apply_optional(target: &mut Option<String>, change: Option<String>) {
    if let Some(value) = change {
        *target = optional(Some(value));
    }
}

/// Reject an empty opaque blob without altering its bytes.
pub(crate) fn blob(field: &str, value: String) -> Result<String, crate::error::VaultError> {
    if value.trim().is_empty() {
        return Err(crate::error::VaultError::invalid(format!(
            "{field} must not be empty"
        )));
    }
    Ok(value)
}
