//! Strongly typed record identifiers.
//!
//! Every entity is keyed by a random v4 UUID. Wrapping each in its own type
//! keeps a `GroupId` from being passed where a `ServiceId` is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifies an [`Account`](crate::model::Account).
    AccountId
);
define_id!(
    /// Identifies an [`AccountGroup`](crate::model::AccountGroup).
    GroupId
);
define_id!(
    /// Identifies a [`Customer`](crate::model::Customer).
    CustomerId
);
define_id!(
    /// Identifies a [`ServiceGroup`](crate::model::ServiceGroup).
    ServiceGroupId
);
define_id!(
    /// Identifies a [`Service`](crate::model::Service).
    ServiceId
);
