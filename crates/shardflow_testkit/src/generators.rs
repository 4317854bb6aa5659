//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use shardflow_consumer::BackoffConfig;
use shardflow_protocol::{AttributeValue, ChangeKind, Item, ItemChange, SequenceNumber, ShardId};
use std::time::Duration;

/// Strategy for generating shard IDs in the usual `shardId-…` form.
pub fn shard_id_strategy() -> impl Strategy<Value = ShardId> {
    prop::string::string_regex("shardId-[0-9]{20}-[0-9a-f]{8}")
        .expect("Invalid regex")
        .prop_map(ShardId::new)
}

/// Strategy for generating wide decimal sequence numbers.
pub fn sequence_number_strategy() -> impl Strategy<Value = SequenceNumber> {
    any::<u128>().prop_map(SequenceNumber::from_u128)
}

/// Strategy for generating attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating attribute values that have a JSON form.
///
/// Binary attributes are excluded, and numbers are limited to integers so
/// they survive a round trip through JSON unchanged.
pub fn json_attribute_strategy() -> impl Strategy<Value = AttributeValue> {
    let leaf = prop_oneof![
        "[ -~]{0,24}".prop_map(AttributeValue::S),
        any::<i64>().prop_map(AttributeValue::from),
        any::<bool>().prop_map(AttributeValue::Bool),
        Just(AttributeValue::Null),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(AttributeValue::L),
            prop::collection::btree_map(attribute_name_strategy(), inner, 0..6)
                .prop_map(AttributeValue::M),
        ]
    })
}

/// Strategy for generating items with JSON-representable attributes.
pub fn item_strategy() -> impl Strategy<Value = Item> {
    prop::collection::btree_map(attribute_name_strategy(), json_attribute_strategy(), 1..8)
}

/// Strategy for generating item changes of every kind.
pub fn item_change_strategy() -> impl Strategy<Value = ItemChange> {
    let keys = prop::collection::btree_map(
        attribute_name_strategy(),
        "[a-z0-9-]{1,16}".prop_map(AttributeValue::S),
        1..3,
    );
    (
        prop_oneof![
            Just(ChangeKind::Insert),
            Just(ChangeKind::Modify),
            Just(ChangeKind::Remove)
        ],
        keys,
        item_strategy(),
        item_strategy(),
    )
        .prop_map(|(kind, keys, old, new)| match kind {
            ChangeKind::Insert => ItemChange::insert(keys, new),
            ChangeKind::Modify => ItemChange::modify(keys, old, new),
            ChangeKind::Remove => ItemChange::remove(keys, old),
        })
}

/// Strategy for generating raw record payloads.
pub fn payload_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating valid backoff settings.
pub fn backoff_config_strategy() -> impl Strategy<Value = BackoffConfig> {
    (1u64..500, 1u64..20, 1.0f64..4.0).prop_map(|(initial_ms, factor, multiplier)| {
        let initial = Duration::from_millis(initial_ms);
        BackoffConfig::new(initial, initial * factor as u32, multiplier)
    })
}

/// Records per shard for a multi-shard workload.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Number of records written to each shard.
    pub records_per_shard: Vec<usize>,
    /// Merge buffer capacity to consume with.
    pub buffer_capacity: usize,
    /// Per-call record limit to consume with.
    pub get_records_limit: u32,
}

impl Workload {
    /// Total number of records across all shards.
    pub fn total_records(&self) -> usize {
        self.records_per_shard.iter().sum()
    }
}

/// Strategy for generating small multi-shard workloads.
pub fn workload_strategy() -> impl Strategy<Value = Workload> {
    (
        prop::collection::vec(0usize..40, 1..6),
        1usize..16,
        1u32..10,
    )
        .prop_map(|(records_per_shard, buffer_capacity, get_records_limit)| Workload {
            records_per_shard,
            buffer_capacity,
            get_records_limit,
        })
}
