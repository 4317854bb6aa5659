//! Stress runs for the consumer.
//!
//! These drive many shards through small buffers, with or without injected
//! faults, and report throughput.

use crate::fixtures::{per_shard_ordered, TestStream};
use shardflow_consumer::{BackoffConfig, LogError, LogOperation, StreamConsumerConfig};
use shardflow_protocol::IteratorPolicy;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Records expected from the stream.
    pub expected: usize,
    /// Records actually delivered.
    pub delivered: usize,
    /// Whether every shard's records arrived in sequence order.
    pub ordered: bool,
    /// Highest buffer occupancy observed by the reader.
    pub peak_buffered: usize,
    /// Total duration.
    pub duration: Duration,
    /// Records per second.
    pub records_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(
        expected: usize,
        delivered: usize,
        ordered: bool,
        peak_buffered: usize,
        duration: Duration,
    ) -> Self {
        let records_per_second = if duration.as_secs_f64() > 0.0 {
            delivered as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            expected,
            delivered,
            ordered,
            peak_buffered,
            duration,
            records_per_second,
        }
    }

    /// Returns true if every record arrived and per-shard order held.
    pub fn is_complete(&self) -> bool {
        self.delivered == self.expected && self.ordered
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Expected records: {}", self.expected);
        println!("Delivered: {}", self.delivered);
        println!("Per-shard order held: {}", self.ordered);
        println!("Peak buffered: {}", self.peak_buffered);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} records/sec", self.records_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of shards.
    pub shards: usize,
    /// Records written to each shard before consuming.
    pub records_per_shard: usize,
    /// Merge buffer capacity.
    pub buffer_capacity: usize,
    /// Per-call record limit.
    pub get_records_limit: u32,
    /// Transient `get_records` faults injected per shard.
    pub transient_faults_per_shard: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            shards: 8,
            records_per_shard: 500,
            buffer_capacity: 16,
            get_records_limit: 25,
            transient_faults_per_shard: 0,
        }
    }
}

/// Drains a fully written, closed stream and reports throughput.
pub async fn stress_drain(config: &StressConfig) -> StressTestResult {
    let stream = TestStream::new(config.shards).with_records(config.records_per_shard);
    for shard in &stream.shards {
        for _ in 0..config.transient_faults_per_shard {
            stream.log.inject_fault(
                LogOperation::GetRecords,
                Some(shard.clone()),
                LogError::transient("injected"),
            );
        }
    }
    stream.close_all();

    let consumer_config = StreamConsumerConfig::new(IteratorPolicy::TrimHorizon)
        .with_buffer_capacity(config.buffer_capacity)
        .with_get_records_limit(config.get_records_limit)
        .with_poll_backoff(BackoffConfig::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        ));
    let consumer = stream
        .consumer(consumer_config)
        .expect("Failed to start consumer");

    let start = Instant::now();
    let mut records = Vec::with_capacity(config.shards * config.records_per_shard);
    let mut peak_buffered = 0;
    while let Some(record) = consumer.next().await {
        peak_buffered = peak_buffered.max(consumer.buffered());
        records.push(record);
    }
    let duration = start.elapsed();
    consumer.close().await;

    StressTestResult::new(
        config.shards * config.records_per_shard,
        records.len(),
        per_shard_ordered(&records),
        peak_buffered,
        duration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_drain() {
        let config = StressConfig {
            shards: 6,
            records_per_shard: 200,
            buffer_capacity: 8,
            get_records_limit: 13,
            transient_faults_per_shard: 0,
        };
        let result = stress_drain(&config).await;
        assert!(result.is_complete(), "{result:?}");
        assert!(result.peak_buffered <= config.buffer_capacity);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_drain_with_transient_faults() {
        let config = StressConfig {
            shards: 4,
            records_per_shard: 100,
            buffer_capacity: 4,
            get_records_limit: 10,
            transient_faults_per_shard: 3,
        };
        let result = stress_drain(&config).await;
        assert!(result.is_complete(), "{result:?}");
    }
}
