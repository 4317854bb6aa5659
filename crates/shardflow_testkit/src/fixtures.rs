//! Test fixtures and stream helpers.
//!
//! Provides convenience functions for setting up in-memory streams
//! and common consumer scenarios.

use crate::generators::Workload;
use futures::StreamExt;
use shardflow_consumer::{MemoryLog, StreamConsumer, StreamConsumerConfig, StreamResult};
use shardflow_protocol::{ChangeRecord, ItemChange, SequenceNumber, ShardId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Default stream name used by fixtures.
pub const TEST_STREAM: &str = "test-table";

/// An in-memory stream with its shards.
pub struct TestStream {
    /// The backing log service.
    pub log: Arc<MemoryLog>,
    /// Stream name.
    pub stream_id: String,
    /// Shards in creation order.
    pub shards: Vec<ShardId>,
}

impl TestStream {
    /// Creates a stream with `shard_count` empty shards.
    pub fn new(shard_count: usize) -> Self {
        Self::named(TEST_STREAM, shard_count)
    }

    /// Creates a named stream with `shard_count` empty shards.
    pub fn named(stream_id: impl Into<String>, shard_count: usize) -> Self {
        let stream_id = stream_id.into();
        let log = Arc::new(MemoryLog::new());
        let shards = log.create_stream(&stream_id, shard_count);
        Self {
            log,
            stream_id,
            shards,
        }
    }

    /// Creates a stream shaped like `workload`, with every shard closed.
    pub fn from_workload(workload: &Workload) -> Self {
        let stream = Self::new(workload.records_per_shard.len());
        for (shard, &count) in stream.shards.iter().zip(&workload.records_per_shard) {
            for i in 0..count {
                stream.put(shard, (i as u32).to_be_bytes().to_vec());
            }
        }
        stream.close_all();
        stream
    }

    /// Appends `count` numbered records to every shard, round-robin.
    pub fn with_records(self, count: usize) -> Self {
        for i in 0..count {
            for shard in &self.shards {
                self.put(shard, (i as u32).to_be_bytes().to_vec());
            }
        }
        self
    }

    /// Appends a byte record.
    pub fn put(&self, shard: &ShardId, data: Vec<u8>) -> SequenceNumber {
        self.log
            .put_bytes(&self.stream_id, shard, data)
            .expect("Failed to append record")
    }

    /// Appends an item change.
    pub fn put_item(&self, shard: &ShardId, change: ItemChange) -> SequenceNumber {
        self.log
            .put_item(&self.stream_id, shard, change)
            .expect("Failed to append item")
    }

    /// Closes every shard so readers reach a natural end.
    pub fn close_all(&self) {
        for shard in &self.shards {
            self.log
                .close_shard(&self.stream_id, shard)
                .expect("Failed to close shard");
        }
    }

    /// Starts a consumer on this stream.
    pub fn consumer(&self, config: StreamConsumerConfig) -> StreamResult<StreamConsumer> {
        StreamConsumer::start(Arc::clone(&self.log), self.stream_id.clone(), config)
    }
}

/// Drains a consumer until its sequence ends or `limit` elapses.
pub async fn collect_all(consumer: &StreamConsumer, limit: Duration) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut stream = Box::pin(consumer.records());
    while let Ok(Some(record)) = tokio::time::timeout(limit, stream.next()).await {
        records.push(record);
    }
    records
}

/// Pulls exactly `count` records, failing if any takes longer than `limit`.
pub async fn take_records(
    consumer: &StreamConsumer,
    count: usize,
    limit: Duration,
) -> Vec<ChangeRecord> {
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let record = tokio::time::timeout(limit, consumer.next())
            .await
            .expect("Timed out waiting for record")
            .expect("Sequence ended early");
        records.push(record);
    }
    records
}

/// Groups records by shard, keeping delivery order.
pub fn by_shard(records: &[ChangeRecord]) -> HashMap<ShardId, Vec<SequenceNumber>> {
    let mut grouped: HashMap<ShardId, Vec<SequenceNumber>> = HashMap::new();
    for record in records {
        grouped
            .entry(record.shard_id.clone())
            .or_default()
            .push(record.sequence_number.clone());
    }
    grouped
}

/// Returns true if every shard's records were delivered in sequence order.
pub fn per_shard_ordered(records: &[ChangeRecord]) -> bool {
    by_shard(records)
        .values()
        .all(|seqs| seqs.windows(2).all(|w| w[0] < w[1]))
}

/// Installs a test-friendly `tracing` subscriber once.
///
/// Filtering follows `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a current-thread runtime with time enabled, for property tests.
pub fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}
