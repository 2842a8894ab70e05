//! Identifier types for federated search
//!
//! Type-safe wrappers keep query ids, chain ids and target ids from being
//! mixed up. Query ids are ULID based so they sort by creation time, which
//! keeps log lines for one query easy to correlate.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Unique identifier of one incoming query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct QueryId(u128);

impl QueryId {
    /// Generate a new ULID-based query identifier
    pub fn new() -> Self {
        Self(Ulid::new().0)
    }

    /// Create a QueryId from a ULID
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.0)
    }

    /// Convert to ULID
    pub fn as_ulid(self) -> Ulid {
        Ulid(self.0)
    }

    /// Get the raw u128 value
    pub fn raw(self) -> u128 {
        self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for QueryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ulid())
    }
}

impl FromStr for QueryId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_ulid(Ulid::from_str(s)?))
    }
}

/// Stable identifier of an executable chain in the [`ChainRegistry`](crate::chain::ChainRegistry)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

/// Identifier of one federation target
///
/// For configured sources this is the source id whichever provider executes
/// it; for providers targeted directly it is the provider id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(ChainId);
string_id!(TargetId);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_query_id_generation() {
        let id1 = QueryId::new();
        let id2 = QueryId::new();

        assert_ne!(id1, id2);
        assert!(id1 < id2 || id2 < id1);
    }

    #[test]
    fn test_query_id_string_roundtrip() {
        let id = QueryId::new();
        let parsed: QueryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_query_id_invalid_string() {
        assert!("not-a-ulid".parse::<QueryId>().is_err());
    }

    #[test]
    fn test_string_ids_display_and_compare() {
        let chain = ChainId::new("news-chain");
        let target = TargetId::from("news");

        assert_eq!(chain.to_string(), "news-chain");
        assert_eq!(target.as_str(), "news");
        assert_eq!(TargetId::from("news".to_string()), target);
    }

    #[test]
    fn test_target_ids_hash_distinctly() {
        let ids: HashSet<TargetId> = ["a", "b", "a"].iter().map(|s| TargetId::from(*s)).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = ChainId::new("web");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"web\"");
        let parsed: ChainId = serde_json::from_str("\"web\"").unwrap();
        assert_eq!(parsed, id);
    }
}
