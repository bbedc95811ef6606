//! Branded ID newtypes.
//!
//! Notification identities and client nonces are both plain strings on the
//! wire. Wrapping them keeps a nonce from being used as a dedup key by
//! accident. Generated values are UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

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
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
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

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
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

branded_id! {
    /// Business-assigned identity of a logical notification, shared by every
    /// channel that delivers it.
    NotificationId
}

branded_id! {
    /// Client-generated nonce correlating `message.send` with `message.ack`.
    ClientNonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn notification_id_new_is_uuid_v7() {
        let id = NotificationId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn nonces_are_unique() {
        assert_ne!(ClientNonce::new(), ClientNonce::new());
    }

    #[test]
    fn generated_ids_sort_by_creation() {
        let a = NotificationId::new();
        let b = NotificationId::new();
        assert!(a <= b);
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map = HashMap::new();
        let _ = map.insert(NotificationId::from("n-1"), 1);
        assert_eq!(map.get("n-1"), Some(&1));
    }

    #[test]
    fn display_and_into_string() {
        let id = ClientNonce::from("nonce-7");
        assert_eq!(format!("{id}"), "nonce-7");
        let s: String = id.into();
        assert_eq!(s, "nonce-7");
    }

    #[test]
    fn serde_is_transparent() {
        let id = NotificationId::from("msg-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"msg-42\"");
        let back: NotificationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
