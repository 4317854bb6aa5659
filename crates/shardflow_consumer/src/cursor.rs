//! Per-shard read position.

use crate::client::LogClient;
use crate::config::BackoffConfig;
use crate::error::LogResult;
use shardflow_protocol::{IteratorPolicy, IteratorToken, ShardDescriptor};
use std::time::Duration;

/// Read position within one shard.
///
/// A cursor is owned by exactly one poller. Before the first successful
/// [`acquire`](Self::acquire) it has no iterator and is not exhausted; after
/// [`advance`](Self::advance) receives `None` it is exhausted for good.
#[derive(Debug)]
pub struct ShardCursor {
    shard: ShardDescriptor,
    iterator: Option<IteratorToken>,
    exhausted: bool,
    consecutive_empty_polls: u32,
}

impl ShardCursor {
    /// Creates a cursor that has not yet acquired an iterator.
    pub fn new(shard: ShardDescriptor) -> Self {
        Self {
            shard,
            iterator: None,
            exhausted: false,
            consecutive_empty_polls: 0,
        }
    }

    /// Obtains the initial iterator for the shard.
    ///
    /// A rejected shard (`ShardGone`) is fatal for this shard only; the
    /// caller decides what to do with retryable errors.
    pub async fn acquire(
        &mut self,
        client: &dyn LogClient,
        stream_id: &str,
        policy: &IteratorPolicy,
    ) -> LogResult<()> {
        let token = client
            .get_shard_iterator(stream_id, &self.shard.id, policy)
            .await?;
        self.iterator = Some(token);
        Ok(())
    }

    /// Moves to the iterator returned by the last read.
    ///
    /// `None` means the shard was read to its natural end.
    pub fn advance(&mut self, next: Option<IteratorToken>) {
        match next {
            Some(token) => self.iterator = Some(token),
            None => {
                self.iterator = None;
                self.exhausted = true;
            }
        }
    }

    /// Records an empty (or transiently failed) poll and returns the streak.
    pub fn record_empty(&mut self) -> u32 {
        self.consecutive_empty_polls = self.consecutive_empty_polls.saturating_add(1);
        self.consecutive_empty_polls
    }

    /// Resets the empty-poll streak after records arrived.
    pub fn reset_backoff(&mut self) {
        self.consecutive_empty_polls = 0;
    }

    /// Delay to apply before the next poll.
    pub fn backoff_delay(&self, config: &BackoffConfig) -> Duration {
        config.delay_for(self.consecutive_empty_polls)
    }

    /// The shard this cursor reads.
    pub fn shard(&self) -> &ShardDescriptor {
        &self.shard
    }

    /// Current iterator, if one has been acquired and the shard is not done.
    pub fn iterator(&self) -> Option<&IteratorToken> {
        self.iterator.as_ref()
    }

    /// Returns true once the shard has been read to its end.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current empty-poll streak.
    pub fn consecutive_empty_polls(&self) -> u32 {
        self.consecutive_empty_polls
    }
}
