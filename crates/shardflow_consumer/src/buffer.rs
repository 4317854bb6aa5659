//! Bounded merge buffer shared by all shard pollers.
//!
//! Pollers publish into the buffer and the consumer drains it. The buffer
//! holds at most `capacity` unconsumed records; a publisher that finds it
//! full suspends until the consumer makes room. Records from different
//! shards interleave in arrival order.
//!
//! The buffer ends in one of two ways:
//! - `seal()`: no more publishers will come; remaining records are still
//!   delivered, then `consume` reports end of stream.
//! - `close()`: everything undelivered is discarded and all waiters wake.

use parking_lot::Mutex;
use shardflow_protocol::ChangeRecord;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Lifecycle of a merge buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Accepting records.
    Open,
    /// Refusing new records, still delivering buffered ones.
    Sealed,
    /// Terminal; nothing is delivered.
    Closed,
}

#[derive(Debug)]
struct BufferState {
    queue: VecDeque<ChangeRecord>,
    status: BufferStatus,
    peak_len: usize,
}

/// A bounded multi-producer, single-consumer queue of change records.
#[derive(Debug)]
pub struct MergeBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    not_full: Notify,
    not_empty: Notify,
}

impl MergeBuffer {
    /// Creates a buffer holding at most `capacity` records.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                status: BufferStatus::Open,
                peak_len: 0,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Publishes a record, waiting while the buffer is full.
    ///
    /// Returns `false` if the buffer was sealed or closed; the record is
    /// dropped in that case.
    pub async fn publish(&self, record: ChangeRecord) -> bool {
        loop {
            // Register interest before checking, so a wake-up between the
            // check and the await is not lost.
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.status != BufferStatus::Open {
                    return false;
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(record);
                    state.peak_len = state.peak_len.max(state.queue.len());
                    drop(state);
                    self.not_empty.notify_one();
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Takes the next record, waiting while the buffer is empty.
    ///
    /// Returns `None` once the buffer is closed, or sealed and drained.
    pub async fn consume(&self) -> Option<ChangeRecord> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                match state.status {
                    BufferStatus::Closed => return None,
                    BufferStatus::Open | BufferStatus::Sealed => {
                        if let Some(record) = state.queue.pop_front() {
                            drop(state);
                            self.not_full.notify_one();
                            return Some(record);
                        }
                        if state.status == BufferStatus::Sealed {
                            return None;
                        }
                    }
                }
            }

            notified.await;
        }
    }

    /// Stops accepting records but keeps delivering buffered ones.
    pub fn seal(&self) {
        {
            let mut state = self.state.lock();
            if state.status != BufferStatus::Open {
                return;
            }
            state.status = BufferStatus::Sealed;
        }
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    /// Closes the buffer, discarding undelivered records.
    ///
    /// Idempotent. Returns the number of records discarded by this call.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            if state.status == BufferStatus::Closed {
                return 0;
            }
            state.status = BufferStatus::Closed;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
        discarded
    }

    /// Returns the current status.
    pub fn status(&self) -> BufferStatus {
        self.state.lock().status
    }

    /// Returns true once the buffer is closed.
    pub fn is_closed(&self) -> bool {
        self.status() == BufferStatus::Closed
    }

    /// Number of unconsumed records.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if no records are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of unconsumed records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest number of unconsumed records ever held at once.
    pub fn peak_len(&self) -> usize {
        self.state.lock().peak_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardflow_protocol::SequenceNumber;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn record(shard: &str, seq: u128) -> ChangeRecord {
        ChangeRecord::bytes(
            shard,
            SequenceNumber::from_u128(seq),
            vec![seq as u8],
            SystemTime::UNIX_EPOCH,
        )
    }

    #[tokio::test]
    async fn fifo_across_publishers() {
        let buffer = MergeBuffer::new(8);
        assert!(buffer.publish(record("a", 1)).await);
        assert!(buffer.publish(record("b", 1)).await);
        assert!(buffer.publish(record("a", 2)).await);

        let order: Vec<_> = [
            buffer.consume().await.unwrap(),
            buffer.consume().await.unwrap(),
            buffer.consume().await.unwrap(),
        ]
        .into_iter()
        .map(|r| (r.shard_id.to_string(), r.sequence_number.to_string()))
        .collect();

        assert_eq!(
            order,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn publisher_blocks_when_full() {
        let buffer = Arc::new(MergeBuffer::new(2));
        assert!(buffer.publish(record("a", 1)).await);
        assert!(buffer.publish(record("a", 2)).await);

        let publisher = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.publish(record("a", 3)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!publisher.is_finished());
        assert_eq!(buffer.len(), 2);

        let first = buffer.consume().await.unwrap();
        assert_eq!(first.sequence_number.as_str(), "1");
        assert!(publisher.await.unwrap());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.peak_len(), 2);
    }

    #[tokio::test]
    async fn consumer_waits_for_records() {
        let buffer = Arc::new(MergeBuffer::new(4));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.consume().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        buffer.publish(record("a", 9)).await;
        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.sequence_number.as_str(), "9");
    }

    #[tokio::test]
    async fn close_wakes_blocked_publishers_and_consumer() {
        let buffer = Arc::new(MergeBuffer::new(1));
        assert!(buffer.publish(record("a", 1)).await);

        let publisher = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.publish(record("a", 2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(buffer.close(), 1);
        assert!(!publisher.await.unwrap());
        assert!(buffer.consume().await.is_none());

        let empty = Arc::new(MergeBuffer::new(1));
        let consumer = {
            let empty = Arc::clone(&empty);
            tokio::spawn(async move { empty.consume().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        empty.close();
        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let buffer = MergeBuffer::new(4);
        buffer.publish(record("a", 1)).await;
        assert_eq!(buffer.close(), 1);
        assert_eq!(buffer.close(), 0);
        assert!(buffer.is_closed());
        assert!(!buffer.publish(record("a", 2)).await);
    }

    #[tokio::test]
    async fn seal_drains_remaining_records() {
        let buffer = MergeBuffer::new(4);
        buffer.publish(record("a", 1)).await;
        buffer.publish(record("a", 2)).await;
        buffer.seal();

        assert!(!buffer.publish(record("a", 3)).await);
        assert_eq!(buffer.consume().await.unwrap().sequence_number.as_str(), "1");
        assert_eq!(buffer.consume().await.unwrap().sequence_number.as_str(), "2");
        assert!(buffer.consume().await.is_none());
        assert_eq!(buffer.status(), BufferStatus::Sealed);
    }

    #[tokio::test]
    async fn close_after_seal_discards() {
        let buffer = MergeBuffer::new(4);
        buffer.publish(record("a", 1)).await;
        buffer.seal();
        buffer.close();
        assert!(buffer.consume().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_capacity_under_contention() {
        let buffer = Arc::new(MergeBuffer::new(3));
        let mut publishers = Vec::new();
        for shard in 0..4 {
            let buffer = Arc::clone(&buffer);
            publishers.push(tokio::spawn(async move {
                for seq in 0..50u128 {
                    assert!(buffer.publish(record(&format!("s{shard}"), seq)).await);
                }
            }));
        }

        let mut received = 0;
        while received < 200 {
            assert!(buffer.len() <= 3);
            if buffer.consume().await.is_some() {
                received += 1;
            }
        }
        for publisher in publishers {
            publisher.await.unwrap();
        }
        assert!(buffer.peak_len() <= 3);
    }
}
