//! Configuration for the stream consumer.

use crate::error::{StreamError, StreamResult};
use shardflow_protocol::{Checkpoint, IteratorPolicy, ShardId};
use std::time::Duration;

/// Largest batch a single `get_records` call may return on DynamoDB Streams.
pub const DEFAULT_GET_RECORDS_LIMIT: u32 = 1000;

/// Default number of unconsumed records held before pollers block.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Configuration for a [`StreamConsumer`](crate::StreamConsumer).
///
/// Immutable once the consumer has started.
#[derive(Debug, Clone)]
pub struct StreamConsumerConfig {
    /// Where newly discovered shards start reading.
    pub iterator_policy: IteratorPolicy,
    /// Maximum records per `get_records` call.
    pub get_records_limit: u32,
    /// Backoff applied after empty polls and transient errors.
    pub poll_backoff: BackoffConfig,
    /// Maximum unconsumed records held in memory.
    pub buffer_capacity: usize,
    /// Interval for re-listing shards. `None` disables rediscovery.
    pub rediscovery_interval: Option<Duration>,
    /// Attempts made at `describe_shards` before startup fails.
    pub discovery_attempts: u32,
    /// Positions to resume from. Shards not listed use `iterator_policy`.
    pub checkpoint: Option<Checkpoint>,
}

impl StreamConsumerConfig {
    /// Creates a configuration with the given iterator policy.
    pub fn new(iterator_policy: IteratorPolicy) -> Self {
        Self {
            iterator_policy,
            get_records_limit: DEFAULT_GET_RECORDS_LIMIT,
            poll_backoff: BackoffConfig::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            rediscovery_interval: None,
            discovery_attempts: 3,
            checkpoint: None,
        }
    }

    /// Sets the per-call record limit.
    pub fn with_get_records_limit(mut self, limit: u32) -> Self {
        self.get_records_limit = limit;
        self
    }

    /// Sets the poll backoff.
    pub fn with_poll_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.poll_backoff = backoff;
        self
    }

    /// Sets the buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Enables periodic shard rediscovery.
    pub fn with_rediscovery_interval(mut self, interval: Duration) -> Self {
        self.rediscovery_interval = Some(interval);
        self
    }

    /// Sets the number of discovery attempts.
    pub fn with_discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = attempts;
        self
    }

    /// Resumes from a previously captured checkpoint.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Returns the iterator policy for a shard, honoring the checkpoint.
    pub fn policy_for(&self, shard_id: &ShardId) -> IteratorPolicy {
        match &self.checkpoint {
            Some(checkpoint) => checkpoint.resume_policy(shard_id, &self.iterator_policy),
            None => self.iterator_policy.clone(),
        }
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> StreamResult<()> {
        if self.get_records_limit == 0 {
            return Err(StreamError::InvalidConfig(
                "get_records_limit must be positive".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "buffer_capacity must be positive".into(),
            ));
        }
        if self.discovery_attempts == 0 {
            return Err(StreamError::InvalidConfig(
                "discovery_attempts must be positive".into(),
            ));
        }
        if self.rediscovery_interval == Some(Duration::ZERO) {
            return Err(StreamError::InvalidConfig(
                "rediscovery_interval must be non-zero".into(),
            ));
        }
        self.poll_backoff.validate()
    }
}

impl Default for StreamConsumerConfig {
    fn default() -> Self {
        Self::new(IteratorPolicy::default())
    }
}

/// Bounded exponential backoff for idle shards.
///
/// After `n` consecutive empty (or transiently failed) polls the poller
/// sleeps `min(initial * multiplier^(n-1), max)`. The streak resets on the
/// next poll that returns records, so the delay falls back to `initial`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first empty poll.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Growth factor per additional empty poll.
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Creates a backoff configuration.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial(mut self, delay: Duration) -> Self {
        self.initial = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max(mut self, delay: Duration) -> Self {
        self.max = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Calculates the delay after `consecutive_empty` idle polls.
    pub fn delay_for(&self, consecutive_empty: u32) -> Duration {
        if consecutive_empty == 0 {
            return Duration::ZERO;
        }
        if consecutive_empty == 1 {
            return self.initial.min(self.max);
        }

        let exponent = consecutive_empty.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(delay_secs).max(self.initial)
        }
    }

    fn validate(&self) -> StreamResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(StreamError::InvalidConfig(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial > self.max {
            return Err(StreamError::InvalidConfig(format!(
                "initial backoff {:?} exceeds max {:?}",
                self.initial, self.max
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // DynamoDB Streams recommends at most four reads per shard per second.
        Self::new(Duration::from_millis(250), Duration::from_secs(5), 2.0)
    }
}
