//! Change records.

use crate::attribute::Item;
use crate::shard::ShardId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

/// Backend-assigned position of a record within its shard.
///
/// Sequence numbers are decimal strings of varying width. Two numeric
/// sequence numbers compare by value: leading zeros are ignored, then the
/// remaining digits compare by count and lexically. This matches numeric
/// order without parsing into a bounded integer, so `"007"` equals `"7"`
/// and sorts below `"10"`. Anything non-numeric falls back to plain string
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    /// Wraps a sequence number.
    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    /// Creates a sequence number from an integer.
    pub fn from_u128(value: u128) -> Self {
        Self(value.to_string())
    }

    /// Returns the raw sequence number.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Significant digits of a numeric sequence number, or `None`.
    fn digits(&self) -> Option<&str> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(self.0.trim_start_matches('0'))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.digits(), other.digits()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialEq for SequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceNumber {}

impl Hash for SequenceNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.digits() {
            Some(digits) => digits.hash(state),
            None => self.0.hash(state),
        }
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceNumber {
    fn from(seq: &str) -> Self {
        Self(seq.to_string())
    }
}

/// Kind of mutation an item change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Item was created.
    Insert,
    /// Item was overwritten or updated.
    Modify,
    /// Item was deleted.
    Remove,
}

impl ChangeKind {
    /// Returns the stream event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Modify => "MODIFY",
            ChangeKind::Remove => "REMOVE",
        }
    }
}

/// A structured item mutation, as produced by table streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    /// Type of change.
    pub kind: ChangeKind,
    /// Primary key attributes of the item.
    pub keys: Item,
    /// Item after the change (Insert/Modify).
    pub new_image: Option<Item>,
    /// Item before the change (Modify/Remove).
    pub old_image: Option<Item>,
}

impl ItemChange {
    /// Creates an insert change.
    pub fn insert(keys: Item, new_image: Item) -> Self {
        Self {
            kind: ChangeKind::Insert,
            keys,
            new_image: Some(new_image),
            old_image: None,
        }
    }

    /// Creates a modify change.
    pub fn modify(keys: Item, old_image: Item, new_image: Item) -> Self {
        Self {
            kind: ChangeKind::Modify,
            keys,
            new_image: Some(new_image),
            old_image: Some(old_image),
        }
    }

    /// Creates a remove change.
    pub fn remove(keys: Item, old_image: Item) -> Self {
        Self {
            kind: ChangeKind::Remove,
            keys,
            new_image: None,
            old_image: Some(old_image),
        }
    }
}

/// Body of a change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Opaque bytes (Kinesis-style data blobs).
    Bytes(Bytes),
    /// Structured item change (table-stream style).
    Item(ItemChange),
}

impl Payload {
    /// Returns the raw bytes, if this is a byte payload.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Item(_) => None,
        }
    }

    /// Returns the item change, if this is a structured payload.
    pub fn as_item(&self) -> Option<&ItemChange> {
        match self {
            Payload::Item(change) => Some(change),
            Payload::Bytes(_) => None,
        }
    }
}

/// One logged mutation read from a shard.
///
/// Within a shard `sequence_number` is strictly increasing. Records from
/// different shards carry no relative order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Shard the record was read from.
    pub shard_id: ShardId,
    /// Position within the shard.
    pub sequence_number: SequenceNumber,
    /// Record body.
    pub payload: Payload,
    /// Approximate time the record was written.
    pub approximate_timestamp: SystemTime,
}

impl ChangeRecord {
    /// Creates a record with a byte payload.
    pub fn bytes(
        shard_id: impl Into<ShardId>,
        sequence_number: SequenceNumber,
        data: impl Into<Bytes>,
        approximate_timestamp: SystemTime,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number,
            payload: Payload::Bytes(data.into()),
            approximate_timestamp,
        }
    }

    /// Creates a record carrying an item change.
    pub fn item(
        shard_id: impl Into<ShardId>,
        sequence_number: SequenceNumber,
        change: ItemChange,
        approximate_timestamp: SystemTime,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence_number,
            payload: Payload::Item(change),
            approximate_timestamp,
        }
    }
}
