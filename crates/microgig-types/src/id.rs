//! Identity types for Microgig
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(UserId, "user", "Unique identifier for a marketplace user");
define_id_type!(JobId, "job", "Unique identifier for a marketplace job");
define_id_type!(ReservationId, "rsv", "Unique identifier for a job reservation");
define_id_type!(WorkProofId, "wp", "Unique identifier for a work-proof submission");
define_id_type!(EntryId, "entry", "Unique identifier for a ledger entry");

impl UserId {
    /// The reserved platform revenue account.
    ///
    /// Commission and fee entries credit this account.
    pub fn platform() -> Self {
        Self(Uuid::nil())
    }

    /// Whether this is the platform revenue account
    pub fn is_platform(&self) -> bool {
        self.0.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_prefix() {
        let id = ReservationId::new();
        assert!(id.to_string().starts_with("rsv_"));
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = JobId::new();
        let parsed = JobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_platform_account() {
        assert!(UserId::platform().is_platform());
        assert!(!UserId::new().is_platform());
        assert_eq!(UserId::platform(), UserId::platform());
    }
}
