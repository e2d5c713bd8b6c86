//! Identity types for ARBITER entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Finding identifier using UUIDv7 for timestamp-sortable IDs.
/// Assigned by the store on insert and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(Uuid);

impl FindingId {
    /// Generate a new timestamp-sortable finding ID.
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FindingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Defines an opaque string identifier issued by an external system.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of an audit task. Every task owns its own finding collection.
    TaskId
);

string_id!(
    /// Identifier of a reviewer agent submitting findings.
    AgentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_id_parse_roundtrip() {
        let id = FindingId::now_v7();
        let parsed: FindingId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_finding_id_parse_rejects_garbage() {
        assert!("not-a-finding".parse::<FindingId>().is_err());
    }

    #[test]
    fn test_finding_ids_sort_by_creation() {
        let a = FindingId::now_v7();
        let b = FindingId::now_v7();
        assert!(a < b);
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let task = TaskId::from("audit-42");
        assert_eq!(serde_json::to_string(&task).unwrap(), "\"audit-42\"");
        assert_eq!(AgentId::new("agent-1").as_str(), "agent-1");
    }
}
