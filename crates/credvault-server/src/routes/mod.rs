//! HTTP route handlers for `CredVault`.
//!
//! Routes are organized by resource:
//! - `sys`: health check
//! - `accounts`: accounts, their key rotation, groups and resolved access
//! - `groups`: groups, memberships and group key rotation
//! - `customers`: customers
//! - `service_groups`: service groups
//! - `services`: services, grants and service key rotation

pub mod accounts;
pub mod customers;
pub mod groups;
pub mod service_groups;
pub mod services;
pub mod sys;

use serde::{Deserialize, Deserializer};

/// Distinguish an absent field from an explicit `null`.
///
/// Used with `#[serde(default, deserialize_with = "double_option")]` so
/// `{"parent_id": null}` clears a link while omitting it leaves the link
/// alone.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
