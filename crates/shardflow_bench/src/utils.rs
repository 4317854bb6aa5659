//! Benchmark utilities.

use rand::Rng;
use shardflow_consumer::MemoryLog;
use shardflow_protocol::{AttributeValue, ChangeRecord, Item, SequenceNumber, ShardId};
use std::sync::Arc;
use std::time::SystemTime;

/// Stream name used by the benchmarks.
pub const BENCH_STREAM: &str = "bench-table";

/// Generate random record data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a batch of byte records for one shard.
pub fn generate_records(shard: &str, count: usize, payload_size: usize) -> Vec<ChangeRecord> {
    (0..count)
        .map(|i| {
            ChangeRecord::bytes(
                shard,
                SequenceNumber::from_u128(i as u128),
                random_data(payload_size),
                SystemTime::UNIX_EPOCH,
            )
        })
        .collect()
}

/// Build a closed stream with `shards` shards of `records_per_shard` records.
pub fn seeded_log(shards: usize, records_per_shard: usize, payload_size: usize) -> Arc<MemoryLog> {
    let log = Arc::new(MemoryLog::new());
    let ids: Vec<ShardId> = log.create_stream(BENCH_STREAM, shards);
    for shard in &ids {
        for _ in 0..records_per_shard {
            log.put_bytes(BENCH_STREAM, shard, random_data(payload_size))
                .expect("append failed");
        }
        log.close_shard(BENCH_STREAM, shard).expect("close failed");
    }
    log
}

/// Generate an item with `width` attributes of mixed types.
pub fn random_item(width: usize) -> Item {
    let mut rng = rand::thread_rng();
    (0..width)
        .map(|i| {
            let value = match i % 4 {
                0 => AttributeValue::S(format!("value-{}", rng.gen::<u32>())),
                1 => AttributeValue::from(rng.gen::<i64>()),
                2 => AttributeValue::Bool(rng.gen()),
                _ => AttributeValue::L(vec![AttributeValue::Null, AttributeValue::from("x")]),
            };
            (format!("attr_{}", i), value)
        })
        .collect()
}
