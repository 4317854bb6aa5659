//! # shardflow protocol
//!
//! Data model shared by the shardflow consumer and the log services it reads.
//!
//! This crate provides:
//! - `ShardDescriptor` and `ShardId` for the partitions of a change log
//! - `IteratorToken` and `IteratorPolicy` for positioning within a shard
//! - `ChangeRecord` and `SequenceNumber` for individual log entries
//! - `AttributeValue` for structured item images, with JSON conversion
//! - `Checkpoint` with CBOR encoding for externally persisted positions
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attribute;
mod checkpoint;
mod error;
mod iterator;
mod record;
mod shard;

pub use attribute::{AttributeValue, Item};
pub use checkpoint::Checkpoint;
pub use error::{ProtocolError, ProtocolResult};
pub use iterator::{IteratorPolicy, IteratorToken, IteratorType};
pub use record::{ChangeKind, ChangeRecord, ItemChange, Payload, SequenceNumber};
pub use shard::{ShardDescriptor, ShardId};
