//! Identifier types for persisted rate snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fixed identifier of the one cached-rates record.
const SINGLETON_SNAPSHOT: u128 = 0x7f3a_2c51_9e04_4d1b_a8c6_51f0_e2b7_d390;

/// Identifier of a cached rate snapshot.
///
/// Only one snapshot is ever persisted; it is created with
/// [`RateSnapshotId::singleton`] and keeps that id for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateSnapshotId(Uuid);

impl RateSnapshotId {
    /// The identifier used when the cache record is first created.
    pub fn singleton() -> Self {
        Self(Uuid::from_u128(SINGLETON_SNAPSHOT))
    }

    /// Generate a new time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Check whether this is the singleton identifier.
    pub fn is_singleton(&self) -> bool {
        *self == Self::singleton()
    }
}

impl Default for RateSnapshotId {
    fn default() -> Self {
        Self::singleton()
    }
}

impl fmt::Display for RateSnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RateSnapshotId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_is_stable() {
        assert_eq!(RateSnapshotId::singleton(), RateSnapshotId::singleton());
        assert!(RateSnapshotId::default().is_singleton());
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = RateSnapshotId::new();
        let b = RateSnapshotId::new();
        assert_ne!(a, b);
        assert!(!a.is_singleton());
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let id = RateSnapshotId::singleton();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
