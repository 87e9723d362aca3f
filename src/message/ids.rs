//! Opaque string identifiers.
//!
//! All ids are cheap to clone (`Arc<str>`) and serialize as plain strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Wraps an existing identifier.
            pub fn new(id: impl Into<Arc<str>>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the identifier is empty or whitespace only.
            #[inline]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id! {
    /// Correlation key for one evaluation; every message of the evaluation carries it.
    EvaluationId
}

string_id! {
    /// Identifies a batch of statistics that must be aggregated together.
    GroupId
}

string_id! {
    /// Identifies one consumer (process) competing for formats.
    ConsumerId
}

impl EvaluationId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }
}

impl ConsumerId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_are_distinct() {
        let a = EvaluationId::random();
        let b = EvaluationId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_blank_detection() {
        assert!(ConsumerId::new("  ").is_blank());
        assert!(!ConsumerId::new("writer-1").is_blank());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = GroupId::new("pool-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pool-7\"");
        let back: GroupId = serde_json::from_str("\"pool-7\"").unwrap();
        assert_eq!(back, id);
    }
}
