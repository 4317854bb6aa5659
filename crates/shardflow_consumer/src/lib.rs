//! # shardflow consumer
//!
//! Backpressured change-stream consumer for shard-partitioned logs such as
//! DynamoDB Streams and Kinesis.
//!
//! This crate provides:
//! - Shard discovery with optional periodic rediscovery
//! - One poller task per shard (initializing → polling ⇄ backoff → draining → closed)
//! - Bounded exponential backoff for idle shards, reset on data
//! - A bounded merge buffer that suspends pollers when full
//! - A pull-based record sequence with a readiness signal and idempotent close
//! - An in-memory, fault-injectable log service for tests
//!
//! ## Architecture
//!
//! ```text
//! LogClient ──> ShardPoller (per shard) ──publish──> MergeBuffer
//!                    ^                                    │
//!              ShardSupervisor                         consume
//!     (discovery, rediscovery, stop)                      v
//!                                                  StreamConsumer
//! ```
//!
//! ## Key Invariants
//!
//! - At most `buffer_capacity` records are held undelivered
//! - Records of one shard are delivered in sequence-number order
//! - No ordering is promised across shards
//! - A failed shard never fails the consumer; only discovery does
//! - After `close()` returns, no poller task is alive

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod client;
mod config;
mod consumer;
mod cursor;
mod error;
mod memory;
mod observer;
mod poller;
mod stats;
mod supervisor;

pub use buffer::{BufferStatus, MergeBuffer};
pub use client::{GetRecordsOutput, LogClient};
pub use config::{
    BackoffConfig, StreamConsumerConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_GET_RECORDS_LIMIT,
};
pub use consumer::StreamConsumer;
pub use cursor::ShardCursor;
pub use error::{LogError, LogResult, StreamError, StreamResult};
pub use memory::{LogOperation, MemoryLog};
pub use observer::{ChannelObserver, ShardEvent, ShardObserver, TracingObserver};
pub use poller::{PollerOutcome, PollerState};
pub use stats::ConsumerStats;
