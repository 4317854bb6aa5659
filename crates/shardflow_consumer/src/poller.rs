//! Shard poller state machine.
//!
//! One poller per shard. It acquires an iterator, reads batches with
//! `get_records`, publishes them into the merge buffer and backs off
//! exponentially while the shard is idle:
//!
//! ```text
//! Initializing -> Polling <-> Backoff
//!                    |
//!                    v
//!                 Draining -> Closed
//!
//! (any non-terminal) -> Failed
//! ```
//!
//! Every suspension point races the shutdown token, so a closed consumer
//! never waits out a backoff or a full buffer.

use crate::cursor::ShardCursor;
use crate::error::LogError;
use crate::observer::ShardEvent;
use crate::supervisor::{Registration, Shared};
use shardflow_protocol::{ChangeRecord, IteratorPolicy, ShardDescriptor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// State of a shard poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollerState {
    /// Acquiring the initial iterator.
    Initializing,
    /// Reading records.
    Polling,
    /// Sleeping after an empty or transiently failed poll.
    Backoff,
    /// Flushing records already read, then stopping.
    Draining,
    /// Stopped normally.
    Closed,
    /// Stopped after a fatal shard error.
    Failed,
}

impl PollerState {
    /// Returns true for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollerState::Closed | PollerState::Failed)
    }

    /// Returns true once the poller has a live cursor or has stopped.
    pub fn is_ready(&self) -> bool {
        !matches!(self, PollerState::Initializing)
    }
}

/// How a poller ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerOutcome {
    /// The shard was read to its natural end.
    Exhausted,
    /// The shard failed fatally.
    Failed(LogError),
    /// The consumer was closed.
    Cancelled,
}

/// Reads one shard into the shared merge buffer.
pub(crate) struct ShardPoller {
    cursor: ShardCursor,
    policy: IteratorPolicy,
    shared: Arc<Shared>,
    registration: Registration,
    ready: Option<oneshot::Sender<()>>,
    pending: VecDeque<ChangeRecord>,
    state: PollerState,
    outcome: Option<PollerOutcome>,
}

impl ShardPoller {
    pub(crate) fn new(
        shard: ShardDescriptor,
        shared: Arc<Shared>,
        registration: Registration,
        ready: oneshot::Sender<()>,
    ) -> Self {
        let policy = shared.config.policy_for(&shard.id);
        Self {
            cursor: ShardCursor::new(shard),
            policy,
            shared,
            registration,
            ready: Some(ready),
            pending: VecDeque::new(),
            state: PollerState::Initializing,
            outcome: None,
        }
    }

    /// Runs the poller until it reaches a terminal state.
    ///
    /// The registration is released when the poller is dropped on return.
    pub(crate) async fn run(mut self) -> PollerOutcome {
        let outcome = self.drive().await;
        let shard_id = self.cursor.shard().id.clone();

        match &outcome {
            PollerOutcome::Exhausted => {
                self.shared.stats.record_shard_exhausted();
                self.shared.observer.on_event(&ShardEvent::Exhausted { shard_id });
            }
            PollerOutcome::Failed(error) => {
                self.shared.stats.record_shard_failed();
                self.shared.observer.on_event(&ShardEvent::Failed {
                    shard_id,
                    error: error.clone(),
                });
            }
            PollerOutcome::Cancelled => {
                self.shared.observer.on_event(&ShardEvent::Stopped { shard_id });
            }
        }

        // Terminal pollers count as ready.
        self.signal_ready();
        outcome
    }

    async fn drive(&mut self) -> PollerOutcome {
        loop {
            let next = match self.state {
                PollerState::Initializing => self.initialize().await,
                PollerState::Polling => self.poll().await,
                PollerState::Backoff => self.backoff().await,
                PollerState::Draining => self.drain().await,
                PollerState::Closed | PollerState::Failed => {
                    return self.outcome.take().unwrap_or(PollerOutcome::Cancelled);
                }
            };
            self.transition(next);
        }
    }

    fn transition(&mut self, next: PollerState) {
        if next == self.state {
            return;
        }
        trace!(
            shard_id = %self.cursor.shard().id,
            from = ?self.state,
            to = ?next,
            "poller transition"
        );
        self.state = next;
        self.registration.set_state(next);
        if next == PollerState::Polling && self.ready.is_some() {
            self.signal_ready();
            self.shared.observer.on_event(&ShardEvent::Ready {
                shard_id: self.cursor.shard().id.clone(),
            });
        }
    }

    fn signal_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            // The supervisor may have stopped waiting.
            let _ = ready.send(());
        }
    }

    async fn initialize(&mut self) -> PollerState {
        let shared = Arc::clone(&self.shared);
        let result = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return self.cancel(),
            result = self.cursor.acquire(
                shared.client.as_ref(),
                &shared.stream_id,
                &self.policy,
            ) => result,
        };

        match result {
            Ok(()) => {
                debug!(
                    shard_id = %self.cursor.shard().id,
                    iterator_type = %self.policy.iterator_type(),
                    "shard iterator acquired"
                );
                PollerState::Polling
            }
            Err(error) if error.is_retryable() => {
                self.note_transient(&error);
                let delay = self.cursor.backoff_delay(&shared.config.poll_backoff);
                if self.sleep(delay).await {
                    PollerState::Initializing
                } else {
                    self.cancel()
                }
            }
            Err(error) => self.fail(error),
        }
    }

    async fn poll(&mut self) -> PollerState {
        let Some(iterator) = self.cursor.iterator().cloned() else {
            return self.finish();
        };

        let shared = Arc::clone(&self.shared);
        let result = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return self.cancel(),
            result = shared
                .client
                .get_records(&iterator, shared.config.get_records_limit) => result,
        };

        let output = match result {
            Ok(output) => output,
            Err(error) if error.is_retryable() => {
                self.note_transient(&error);
                return PollerState::Backoff;
            }
            Err(error) => return self.fail(error),
        };

        let received = output.records.len();
        shared.stats.record_poll(received);
        trace!(shard_id = %self.cursor.shard().id, received, "get_records returned");

        self.cursor.advance(output.next_iterator);
        if received == 0 {
            if self.cursor.is_exhausted() {
                return self.finish();
            }
            self.cursor.record_empty();
            return PollerState::Backoff;
        }

        self.cursor.reset_backoff();
        self.pending.extend(output.records);
        if self.cursor.is_exhausted() {
            return self.finish();
        }
        if self.flush().await {
            PollerState::Polling
        } else {
            self.cancel()
        }
    }

    async fn backoff(&mut self) -> PollerState {
        let delay = self.cursor.backoff_delay(&self.shared.config.poll_backoff);
        if self.sleep(delay).await {
            PollerState::Polling
        } else {
            self.cancel()
        }
    }

    async fn drain(&mut self) -> PollerState {
        if matches!(self.outcome, Some(PollerOutcome::Exhausted)) && !self.flush().await {
            self.outcome = Some(PollerOutcome::Cancelled);
        }
        self.pending.clear();
        PollerState::Closed
    }

    /// Publishes pending records in order. Returns false if shutdown won.
    async fn flush(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        while let Some(record) = self.pending.pop_front() {
            let published = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => false,
                published = shared.buffer.publish(record) => published,
            };
            if !published {
                self.pending.clear();
                return false;
            }
            shared.stats.record_published();
        }
        true
    }

    /// Sleeps for `delay`. Returns false if shutdown won.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn note_transient(&mut self, error: &LogError) {
        let streak = self.cursor.record_empty();
        self.shared.stats.record_transient_error();
        debug!(
            shard_id = %self.cursor.shard().id,
            %error,
            streak,
            "transient shard error, backing off"
        );
    }

    fn finish(&mut self) -> PollerState {
        self.outcome = Some(PollerOutcome::Exhausted);
        PollerState::Draining
    }

    fn cancel(&mut self) -> PollerState {
        self.outcome = Some(PollerOutcome::Cancelled);
        PollerState::Draining
    }

    fn fail(&mut self, error: LogError) -> PollerState {
        self.pending.clear();
        self.outcome = Some(PollerOutcome::Failed(error));
        PollerState::Failed
    }
}
