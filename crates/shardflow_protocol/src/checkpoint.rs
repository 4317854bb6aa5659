//! Per-shard positions that a host can persist between runs.

use crate::error::{ProtocolError, ProtocolResult};
use crate::iterator::IteratorPolicy;
use crate::record::SequenceNumber;
use crate::shard::ShardId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last delivered sequence number for each shard.
///
/// The consumer never persists a checkpoint itself. Hosts that want to
/// resume after a restart encode it, store it wherever they like, and pass
/// it back in through the consumer configuration. Resuming starts each
/// known shard right after its recorded position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    positions: BTreeMap<ShardId, SequenceNumber>,
}

impl Checkpoint {
    /// Creates an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivered position. Older positions never replace newer ones.
    pub fn observe(&mut self, shard_id: &ShardId, seq: &SequenceNumber) {
        match self.positions.get_mut(shard_id) {
            Some(current) if *current >= *seq => {}
            Some(current) => *current = seq.clone(),
            None => {
                self.positions.insert(shard_id.clone(), seq.clone());
            }
        }
    }

    /// Returns the recorded position of a shard.
    pub fn get(&self, shard_id: &ShardId) -> Option<&SequenceNumber> {
        self.positions.get(shard_id)
    }

    /// Returns the iterator policy to resume `shard_id` with, falling back
    /// to `default` for shards without a recorded position.
    pub fn resume_policy(&self, shard_id: &ShardId, default: &IteratorPolicy) -> IteratorPolicy {
        match self.positions.get(shard_id) {
            Some(seq) => IteratorPolicy::AfterSequenceNumber(seq.clone()),
            None => default.clone(),
        }
    }

    /// Number of shards with a recorded position.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if no positions are recorded.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterates over recorded positions in shard order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShardId, &SequenceNumber)> {
        self.positions.iter()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
    }
}
