//! # shardflow testkit
//!
//! Test utilities for shardflow.
//!
//! This crate provides:
//! - In-memory stream fixtures built on `MemoryLog`
//! - Property-based test generators using proptest
//! - Helpers for draining consumers and checking per-shard order
//! - Stress runs with small buffers and injected faults
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shardflow_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reads_everything() {
//!     let stream = TestStream::new(2).with_records(10);
//!     stream.close_all();
//!     let consumer = stream.consumer(Default::default()).unwrap();
//!     let records = collect_all(&consumer, Duration::from_secs(5)).await;
//!     assert!(per_shard_ordered(&records));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
