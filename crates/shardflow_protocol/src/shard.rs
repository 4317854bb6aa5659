//! Shard identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one ordered partition of a change log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    /// Creates a shard ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Describes a shard as reported by the log service.
///
/// `parent_id` is populated for shards created by a split or merge. It is
/// carried for observability only: consumers treat child shards as
/// independent and never stitch lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// Shard ID.
    pub id: ShardId,
    /// Parent shard ID, if the shard was produced by re-sharding.
    pub parent_id: Option<ShardId>,
}

impl ShardDescriptor {
    /// Creates a descriptor for a shard without a parent.
    pub fn new(id: impl Into<ShardId>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    /// Creates a descriptor for a child shard.
    pub fn with_parent(id: impl Into<ShardId>, parent: impl Into<ShardId>) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent.into()),
        }
    }
}
