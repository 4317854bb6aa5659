//! Consumer statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of consumer activity since it started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Records pushed into the merge buffer by pollers.
    pub records_published: u64,
    /// Records handed to the caller.
    pub records_delivered: u64,
    /// `get_records` calls issued.
    pub polls: u64,
    /// Polls that returned no records.
    pub empty_polls: u64,
    /// Retryable backend errors absorbed by backoff.
    pub transient_errors: u64,
    /// Pollers spawned.
    pub shards_started: u64,
    /// Shards read to their natural end.
    pub shards_exhausted: u64,
    /// Shards that failed fatally.
    pub shards_failed: u64,
    /// Completed rediscovery passes.
    pub rediscovery_passes: u64,
}

/// Lock-free counters shared by the consumer's tasks.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    records_published: AtomicU64,
    records_delivered: AtomicU64,
    polls: AtomicU64,
    empty_polls: AtomicU64,
    transient_errors: AtomicU64,
    shards_started: AtomicU64,
    shards_exhausted: AtomicU64,
    shards_failed: AtomicU64,
    rediscovery_passes: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.records_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self, received: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if received == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shard_started(&self) {
        self.shards_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shard_exhausted(&self) {
        self.shards_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shard_failed(&self) {
        self.shards_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rediscovery(&self) {
        self.rediscovery_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            records_published: self.records_published.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            shards_started: self.shards_started.load(Ordering::Relaxed),
            shards_exhausted: self.shards_exhausted.load(Ordering::Relaxed),
            shards_failed: self.shards_failed.load(Ordering::Relaxed),
            rediscovery_passes: self.rediscovery_passes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = StatsRecorder::default();
        stats.record_poll(0);
        stats.record_poll(3);
        stats.record_published();
        stats.record_shard_failed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.empty_polls, 1);
        assert_eq!(snapshot.records_published, 1);
        assert_eq!(snapshot.shards_failed, 1);
        assert_eq!(snapshot.records_delivered, 0);
    }
}
