//! Log service abstraction.

use crate::error::LogResult;
use async_trait::async_trait;
use shardflow_protocol::{ChangeRecord, IteratorPolicy, IteratorToken, ShardDescriptor, ShardId};
use std::sync::Arc;

/// Output of a single `get_records` call.
#[derive(Debug, Clone, Default)]
pub struct GetRecordsOutput {
    /// Records in shard order. May be empty.
    pub records: Vec<ChangeRecord>,
    /// Iterator for the next call. `None` once a closed shard is fully read.
    pub next_iterator: Option<IteratorToken>,
}

impl GetRecordsOutput {
    /// Creates an output.
    pub fn new(records: Vec<ChangeRecord>, next_iterator: Option<IteratorToken>) -> Self {
        Self {
            records,
            next_iterator,
        }
    }
}

/// A client for a shard-partitioned change log.
///
/// This trait abstracts the backend, allowing for different implementations
/// (DynamoDB Streams, Kinesis, in-memory for testing, etc.). Per-call
/// timeouts are the client's concern; a timed out call should be reported
/// as [`LogError::Timeout`](crate::LogError::Timeout).
#[async_trait]
pub trait LogClient: Send + Sync + 'static {
    /// Lists the shards of a stream in backend order.
    ///
    /// Fails with `NotFound` if the stream does not exist or cannot be read.
    async fn describe_shards(&self, stream_id: &str) -> LogResult<Vec<ShardDescriptor>>;

    /// Obtains an iterator positioned according to `policy`.
    ///
    /// Fails with `ShardGone` if the backend no longer knows the shard.
    async fn get_shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        policy: &IteratorPolicy,
    ) -> LogResult<IteratorToken>;

    /// Reads up to `limit` records from an iterator.
    async fn get_records(
        &self,
        iterator: &IteratorToken,
        limit: u32,
    ) -> LogResult<GetRecordsOutput>;
}

#[async_trait]
impl<T: LogClient + ?Sized> LogClient for Arc<T> {
    async fn describe_shards(&self, stream_id: &str) -> LogResult<Vec<ShardDescriptor>> {
        (**self).describe_shards(stream_id).await
    }

    async fn get_shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        policy: &IteratorPolicy,
    ) -> LogResult<IteratorToken> {
        (**self)
            .get_shard_iterator(stream_id, shard_id, policy)
            .await
    }

    async fn get_records(
        &self,
        iterator: &IteratorToken,
        limit: u32,
    ) -> LogResult<GetRecordsOutput> {
        (**self).get_records(iterator, limit).await
    }
}
