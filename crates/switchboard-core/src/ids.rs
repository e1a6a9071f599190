//! Branded ID newtypes for type safety.
//!
//! Tenant identifiers arrive from the upstream authentication layer and are
//! opaque to us. Channel references and call ids are minted locally as
//! UUID v7 (time-ordered) strings via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Organizational unit a connection and its RPC calls belong to.
    TenantId
}

branded_id! {
    /// Opaque reference to a live duplex channel inside this process.
    ///
    /// The same value is written into the durable presence record so that a
    /// record can be matched against the local channel map.
    ChannelRef
}

branded_id! {
    /// Correlation id of an outbound call.
    CallId
}

generated_id!(ChannelRef);
generated_id!(CallId);

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ref_new_is_uuid_v7() {
        let id = ChannelRef::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn call_ids_are_unique() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn call_ids_sort_by_creation() {
        let a = CallId::new();
        let b = CallId::new();
        assert!(a < b);
    }

    #[test]
    fn tenant_from_str_ref() {
        let id = TenantId::from("acme");
        assert_eq!(id.as_str(), "acme");
        assert_eq!(format!("{id}"), "acme");
    }

    #[test]
    fn deref_to_str() {
        let id = ChannelRef::from("ref-1");
        let s: &str = &id;
        assert_eq!(s, "ref-1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = TenantId::from("tenant-a");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tenant-a\"");
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn into_string() {
        let id = CallId::from("call-9");
        let s: String = id.into();
        assert_eq!(s, "call-9");
    }
}
