//! In-memory log service.
//!
//! `MemoryLog` implements [`LogClient`] over process memory. It behaves like
//! a small DynamoDB Streams endpoint: shards are append-only, closed shards
//! end their iterators with `None`, iterators are single use, and trimmed
//! positions report `ExpiredIterator`. Faults can be queued per operation
//! and shard to exercise the consumer's error paths.

use crate::client::{GetRecordsOutput, LogClient};
use crate::error::{LogError, LogResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use shardflow_protocol::{
    ChangeRecord, IteratorPolicy, IteratorToken, ItemChange, Payload, SequenceNumber,
    ShardDescriptor, ShardId,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

/// First sequence number handed out. Real streams use wide decimal numbers.
const FIRST_SEQUENCE: u128 = 100_000_000_000_000_000_000;

/// Log operations that faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogOperation {
    /// `describe_shards`.
    DescribeShards,
    /// `get_shard_iterator`.
    GetShardIterator,
    /// `get_records`.
    GetRecords,
}

#[derive(Debug)]
struct MemoryShard {
    descriptor: ShardDescriptor,
    /// Absolute position of `records[0]`; grows as the shard is trimmed.
    base: usize,
    records: Vec<ChangeRecord>,
    closed: bool,
}

impl MemoryShard {
    fn end(&self) -> usize {
        self.base + self.records.len()
    }
}

#[derive(Debug, Default)]
struct MemoryStream {
    shards: Vec<MemoryShard>,
}

impl MemoryStream {
    fn shard(&self, shard_id: &ShardId) -> Option<&MemoryShard> {
        self.shards.iter().find(|s| &s.descriptor.id == shard_id)
    }

    fn shard_mut(&mut self, shard_id: &ShardId) -> Option<&mut MemoryShard> {
        self.shards.iter_mut().find(|s| &s.descriptor.id == shard_id)
    }
}

#[derive(Debug, Clone)]
struct IteratorState {
    stream_id: String,
    shard_id: ShardId,
    position: usize,
}

#[derive(Debug, Default)]
struct LogState {
    streams: HashMap<String, MemoryStream>,
    iterators: HashMap<String, IteratorState>,
    next_token: u64,
    next_sequence: u128,
    next_shard: u64,
    faults: HashMap<(LogOperation, Option<ShardId>), VecDeque<LogError>>,
    calls: HashMap<(LogOperation, Option<ShardId>), u64>,
}

impl LogState {
    fn stream(&self, stream_id: &str) -> LogResult<&MemoryStream> {
        self.streams
            .get(stream_id)
            .ok_or_else(|| LogError::NotFound(stream_id.to_string()))
    }

    fn issue_token(
        &mut self,
        stream_id: &str,
        shard_id: &ShardId,
        position: usize,
    ) -> IteratorToken {
        self.next_token += 1;
        let token = format!("{}/{}/{:016x}", stream_id, shard_id, self.next_token);
        self.iterators.insert(
            token.clone(),
            IteratorState {
                stream_id: stream_id.to_string(),
                shard_id: shard_id.clone(),
                position,
            },
        );
        IteratorToken::new(token)
    }

    fn note_call(&mut self, op: LogOperation, shard_id: Option<&ShardId>) {
        *self.calls.entry((op, shard_id.cloned())).or_default() += 1;
        if shard_id.is_some() {
            *self.calls.entry((op, None)).or_default() += 1;
        }
    }

    fn take_fault(&mut self, op: LogOperation, shard_id: Option<&ShardId>) -> Option<LogError> {
        if let Some(shard_id) = shard_id {
            if let Some(err) = self
                .faults
                .get_mut(&(op, Some(shard_id.clone())))
                .and_then(VecDeque::pop_front)
            {
                return Some(err);
            }
        }
        self.faults.get_mut(&(op, None)).and_then(VecDeque::pop_front)
    }
}

/// An in-memory, fault-injectable log service.
#[derive(Debug)]
pub struct MemoryLog {
    state: Mutex<LogState>,
    latency: Mutex<Duration>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    /// Creates an empty log service.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                next_sequence: FIRST_SEQUENCE,
                ..LogState::default()
            }),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Creates a stream with `shard_count` open shards and returns their IDs.
    ///
    /// Creating an existing stream adds the shards to it.
    pub fn create_stream(&self, stream_id: &str, shard_count: usize) -> Vec<ShardId> {
        self.state
            .lock()
            .streams
            .entry(stream_id.to_string())
            .or_default();
        (0..shard_count)
            .map(|_| self.add_shard(stream_id, None))
            .collect()
    }

    /// Adds an open shard, creating the stream if needed.
    pub fn add_shard(&self, stream_id: &str, parent_id: Option<ShardId>) -> ShardId {
        let mut state = self.state.lock();
        state.next_shard += 1;
        let shard_id = ShardId::new(format!("shardId-{:020}", state.next_shard));
        let descriptor = ShardDescriptor {
            id: shard_id.clone(),
            parent_id,
        };
        state
            .streams
            .entry(stream_id.to_string())
            .or_default()
            .shards
            .push(MemoryShard {
                descriptor,
                base: 0,
                records: Vec::new(),
                closed: false,
            });
        shard_id
    }

    /// Closes `parent` and adds a child shard that continues its key range.
    pub fn split_shard(&self, stream_id: &str, parent: &ShardId) -> LogResult<ShardId> {
        self.close_shard(stream_id, parent)?;
        Ok(self.add_shard(stream_id, Some(parent.clone())))
    }

    /// Appends a record to a shard and returns its sequence number.
    pub fn put(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        payload: Payload,
    ) -> LogResult<SequenceNumber> {
        let mut state = self.state.lock();
        let seq = SequenceNumber::from_u128(state.next_sequence);
        let shard = state
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| LogError::NotFound(stream_id.to_string()))?
            .shard_mut(shard_id)
            .ok_or_else(|| LogError::ShardGone(shard_id.clone()))?;
        if shard.closed {
            return Err(LogError::ShardGone(shard_id.clone()));
        }
        shard.records.push(ChangeRecord {
            shard_id: shard_id.clone(),
            sequence_number: seq.clone(),
            payload,
            approximate_timestamp: SystemTime::now(),
        });
        state.next_sequence += 1;
        Ok(seq)
    }

    /// Appends a byte record.
    pub fn put_bytes(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        data: impl Into<Bytes>,
    ) -> LogResult<SequenceNumber> {
        self.put(stream_id, shard_id, Payload::Bytes(data.into()))
    }

    /// Appends an item change.
    pub fn put_item(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        change: ItemChange,
    ) -> LogResult<SequenceNumber> {
        self.put(stream_id, shard_id, Payload::Item(change))
    }

    /// Marks a shard closed. Readers that reach its end get no next iterator.
    pub fn close_shard(&self, stream_id: &str, shard_id: &ShardId) -> LogResult<()> {
        let mut state = self.state.lock();
        let shard = state
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| LogError::NotFound(stream_id.to_string()))?
            .shard_mut(shard_id)
            .ok_or_else(|| LogError::ShardGone(shard_id.clone()))?;
        shard.closed = true;
        Ok(())
    }

    /// Removes a shard entirely, as when it ages out of retention.
    pub fn remove_shard(&self, stream_id: &str, shard_id: &ShardId) {
        let mut state = self.state.lock();
        if let Some(stream) = state.streams.get_mut(stream_id) {
            stream.shards.retain(|s| &s.descriptor.id != shard_id);
        }
    }

    /// Drops the oldest `count` records of a shard.
    pub fn trim(&self, stream_id: &str, shard_id: &ShardId, count: usize) -> LogResult<()> {
        let mut state = self.state.lock();
        let shard = state
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| LogError::NotFound(stream_id.to_string()))?
            .shard_mut(shard_id)
            .ok_or_else(|| LogError::ShardGone(shard_id.clone()))?;
        let count = count.min(shard.records.len());
        shard.records.drain(..count);
        shard.base += count;
        Ok(())
    }

    /// Invalidates every outstanding iterator of a shard.
    pub fn expire_iterators(&self, shard_id: &ShardId) {
        self.state
            .lock()
            .iterators
            .retain(|_, it| &it.shard_id != shard_id);
    }

    /// Queues an error returned by the next matching call.
    ///
    /// With `shard_id` set, only calls for that shard match. Shard-specific
    /// faults are consumed before shard-agnostic ones.
    pub fn inject_fault(&self, op: LogOperation, shard_id: Option<ShardId>, error: LogError) {
        self.state
            .lock()
            .faults
            .entry((op, shard_id))
            .or_default()
            .push_back(error);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of calls made for an operation, optionally for one shard.
    pub fn call_count(&self, op: LogOperation, shard_id: Option<&ShardId>) -> u64 {
        self.state
            .lock()
            .calls
            .get(&(op, shard_id.cloned()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of records currently retained by a shard.
    pub fn shard_len(&self, stream_id: &str, shard_id: &ShardId) -> usize {
        self.state
            .lock()
            .streams
            .get(stream_id)
            .and_then(|s| s.shard(shard_id))
            .map_or(0, |s| s.records.len())
    }

    /// Number of iterators issued and not yet used.
    pub fn outstanding_iterators(&self) -> usize {
        self.state.lock().iterators.len()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn describe_shards(&self, stream_id: &str) -> LogResult<Vec<ShardDescriptor>> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.note_call(LogOperation::DescribeShards, None);
        if let Some(err) = state.take_fault(LogOperation::DescribeShards, None) {
            return Err(err);
        }
        Ok(state
            .stream(stream_id)?
            .shards
            .iter()
            .map(|s| s.descriptor.clone())
            .collect())
    }

    async fn get_shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &ShardId,
        policy: &IteratorPolicy,
    ) -> LogResult<IteratorToken> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.note_call(LogOperation::GetShardIterator, Some(shard_id));
        if let Some(err) = state.take_fault(LogOperation::GetShardIterator, Some(shard_id)) {
            return Err(err);
        }

        let shard = state
            .stream(stream_id)?
            .shard(shard_id)
            .ok_or_else(|| LogError::ShardGone(shard_id.clone()))?;
        let position = match policy {
            IteratorPolicy::Latest => shard.end(),
            IteratorPolicy::TrimHorizon => shard.base,
            IteratorPolicy::AtSequenceNumber(seq) => {
                shard.base + shard.records.partition_point(|r| r.sequence_number < *seq)
            }
            IteratorPolicy::AfterSequenceNumber(seq) => {
                shard.base + shard.records.partition_point(|r| r.sequence_number <= *seq)
            }
        };

        Ok(state.issue_token(stream_id, shard_id, position))
    }

    async fn get_records(
        &self,
        iterator: &IteratorToken,
        limit: u32,
    ) -> LogResult<GetRecordsOutput> {
        self.simulate_latency().await;
        let mut state = self.state.lock();

        // Tokens are single use.
        let Some(it) = state.iterators.remove(iterator.as_str()) else {
            state.note_call(LogOperation::GetRecords, None);
            return Err(LogError::ExpiredIterator);
        };
        state.note_call(LogOperation::GetRecords, Some(&it.shard_id));
        if let Some(err) = state.take_fault(LogOperation::GetRecords, Some(&it.shard_id)) {
            // A failed call leaves the iterator usable, as a real backend would.
            if err.is_retryable() {
                state.iterators.insert(iterator.as_str().to_string(), it);
            }
            return Err(err);
        }

        let shard = state
            .stream(&it.stream_id)
            .ok()
            .and_then(|s| s.shard(&it.shard_id))
            .ok_or_else(|| LogError::ShardGone(it.shard_id.clone()))?;
        if it.position < shard.base {
            return Err(LogError::ExpiredIterator);
        }

        let start = it.position - shard.base;
        let end = (start + limit as usize).min(shard.records.len());
        let records = shard.records[start..end].to_vec();
        let next_position = shard.base + end;
        let finished = shard.closed && next_position == shard.end();

        let next_iterator = if finished {
            None
        } else {
            Some(state.issue_token(&it.stream_id, &it.shard_id, next_position))
        };
        Ok(GetRecordsOutput::new(records, next_iterator))
    }
}
