//! Shard discovery and poller lifecycle.
//!
//! The supervisor lists the stream's shards, spawns one [`ShardPoller`] per
//! shard onto a shared `TaskTracker`, and optionally re-lists shards on an
//! interval to pick up new ones. Every spawned task is owned by the tracker,
//! so `stop()` can cancel them all and wait for the last one to exit.

use crate::buffer::MergeBuffer;
use crate::client::LogClient;
use crate::config::StreamConsumerConfig;
use crate::error::{StreamError, StreamResult};
use crate::observer::{ShardEvent, ShardObserver};
use crate::poller::{PollerState, ShardPoller};
use crate::stats::StatsRecorder;
use futures::future::join_all;
use parking_lot::Mutex;
use shardflow_protocol::{ShardDescriptor, ShardId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug)]
struct RegistryInner {
    states: Mutex<HashMap<ShardId, PollerState>>,
    known: Mutex<HashSet<ShardId>>,
    live: watch::Sender<usize>,
}

/// Live pollers and every shard ever seen.
#[derive(Debug, Clone)]
pub(crate) struct PollerRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for PollerRegistry {
    fn default() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                states: Mutex::new(HashMap::new()),
                known: Mutex::new(HashSet::new()),
                live,
            }),
        }
    }
}

impl PollerRegistry {
    /// Marks a shard as seen. Returns false if it was already known.
    pub(crate) fn track(&self, shard_id: &ShardId) -> bool {
        self.inner.known.lock().insert(shard_id.clone())
    }

    /// Registers a live poller. It stays live until the guard is dropped.
    pub(crate) fn register(&self, shard_id: &ShardId) -> Registration {
        let live = {
            let mut states = self.inner.states.lock();
            states.insert(shard_id.clone(), PollerState::Initializing);
            states.len()
        };
        self.inner.live.send_replace(live);
        Registration {
            inner: Arc::clone(&self.inner),
            shard_id: shard_id.clone(),
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.inner.states.lock().len()
    }

    pub(crate) fn known_count(&self) -> usize {
        self.inner.known.lock().len()
    }

    pub(crate) fn states(&self) -> HashMap<ShardId, PollerState> {
        self.inner.states.lock().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.live.subscribe()
    }
}

/// A poller's entry in the registry. Dropping it deregisters the poller.
#[derive(Debug)]
pub(crate) struct Registration {
    inner: Arc<RegistryInner>,
    shard_id: ShardId,
}

impl Registration {
    pub(crate) fn set_state(&self, state: PollerState) {
        if let Some(slot) = self.inner.states.lock().get_mut(&self.shard_id) {
            *slot = state;
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let live = {
            let mut states = self.inner.states.lock();
            states.remove(&self.shard_id);
            states.len()
        };
        self.inner.live.send_replace(live);
    }
}

/// State shared by the supervisor, its pollers and the consumer.
pub(crate) struct Shared {
    pub(crate) stream_id: String,
    pub(crate) client: Arc<dyn LogClient>,
    pub(crate) config: StreamConsumerConfig,
    pub(crate) buffer: MergeBuffer,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) registry: PollerRegistry,
    pub(crate) observer: Arc<dyn ShardObserver>,
    pub(crate) stats: StatsRecorder,
}

impl Shared {
    pub(crate) fn new(
        stream_id: impl Into<String>,
        client: Arc<dyn LogClient>,
        config: StreamConsumerConfig,
        observer: Arc<dyn ShardObserver>,
    ) -> Self {
        let buffer = MergeBuffer::new(config.buffer_capacity);
        Self {
            stream_id: stream_id.into(),
            client,
            config,
            buffer,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            registry: PollerRegistry::default(),
            observer,
            stats: StatsRecorder::default(),
        }
    }

    /// Spawns a poller for a shard not seen before.
    ///
    /// Returns the poller's readiness receiver, or `None` if the shard is
    /// already tracked.
    fn spawn_poller(self: &Arc<Self>, shard: ShardDescriptor) -> Option<oneshot::Receiver<()>> {
        if !self.registry.track(&shard.id) {
            return None;
        }

        self.observer.on_event(&ShardEvent::Discovered {
            shard: shard.clone(),
        });
        self.stats.record_shard_started();

        let (ready_tx, ready_rx) = oneshot::channel();
        let registration = self.registry.register(&shard.id);
        let span = info_span!("shard_poller", stream_id = %self.stream_id, shard_id = %shard.id);
        let poller = ShardPoller::new(shard, Arc::clone(self), registration, ready_tx);
        self.tracker.spawn(poller.run().instrument(span));
        Some(ready_rx)
    }

    async fn describe_shards(&self) -> StreamResult<Vec<ShardDescriptor>> {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(StreamError::Closed),
            result = self.client.describe_shards(&self.stream_id) => result,
        };
        result.map_err(|source| StreamError::Discovery {
            stream_id: self.stream_id.clone(),
            source,
        })
    }

    /// Sleeps unless shutdown comes first. Returns false on shutdown.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Discovers shards and owns their pollers.
pub(crate) struct ShardSupervisor {
    shared: Arc<Shared>,
}

impl ShardSupervisor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Discovers the stream and spawns a poller per shard.
    ///
    /// Resolves once every initial poller is polling or has stopped.
    /// Transient discovery errors are retried up to `discovery_attempts`
    /// times; anything else fails with [`StreamError::Discovery`].
    pub(crate) async fn start(&self) -> StreamResult<()> {
        let shards = self.discover().await?;
        info!(
            stream_id = %self.shared.stream_id,
            shards = shards.len(),
            "shards discovered"
        );

        let ready: Vec<_> = shards
            .into_iter()
            .filter_map(|shard| self.shared.spawn_poller(shard))
            .collect();

        match self.shared.config.rediscovery_interval {
            Some(interval) => self.spawn_rediscovery(interval),
            None => self.spawn_seal_when_idle(),
        }

        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(StreamError::Closed),
            // A dropped sender means the poller stopped; it counts as ready.
            _ = join_all(ready) => Ok(()),
        }
    }

    /// Cancels every poller and waits until all of them have exited.
    ///
    /// Undelivered records are discarded. Safe to call more than once.
    pub(crate) async fn stop(&self) {
        self.shared.shutdown.cancel();
        let discarded = self.shared.buffer.close();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!(
            stream_id = %self.shared.stream_id,
            discarded,
            "supervisor stopped"
        );
    }

    async fn discover(&self) -> StreamResult<Vec<ShardDescriptor>> {
        let attempts = self.shared.config.discovery_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.shared.describe_shards().await {
                Ok(shards) => return Ok(shards),
                Err(StreamError::Discovery { source, .. })
                    if source.is_retryable() && attempt < attempts =>
                {
                    let delay = self.shared.config.poll_backoff.delay_for(attempt);
                    warn!(
                        stream_id = %self.shared.stream_id,
                        error = %source,
                        attempt,
                        ?delay,
                        "shard discovery failed, retrying"
                    );
                    if !self.shared.sleep(delay).await {
                        return Err(StreamError::Closed);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn spawn_rediscovery(&self, period: Duration) {
        let shared = Arc::clone(&self.shared);
        let span = info_span!("rediscovery", stream_id = %shared.stream_id);
        self.shared.tracker.spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = shared.shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    match shared.describe_shards().await {
                        Ok(shards) => {
                            let spawned = shards
                                .into_iter()
                                .filter_map(|shard| shared.spawn_poller(shard))
                                .count();
                            shared.stats.record_rediscovery();
                            if spawned > 0 {
                                info!(spawned, "new shards discovered");
                            }
                        }
                        Err(StreamError::Closed) => break,
                        Err(error) => warn!(%error, "rediscovery failed"),
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Seals the buffer once no poller is left, ending the record sequence
    /// after the remaining records are delivered.
    fn spawn_seal_when_idle(&self) {
        let shared = Arc::clone(&self.shared);
        let mut live = shared.registry.subscribe();
        self.shared.tracker.spawn(async move {
            loop {
                if *live.borrow_and_update() == 0 {
                    shared.buffer.seal();
                    debug!(stream_id = %shared.stream_id, "all shards finished");
                    break;
                }
                tokio::select! {
                    biased;
                    _ = shared.shutdown.cancelled() => break,
                    changed = live.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::error::LogError;
    use crate::memory::{LogOperation, MemoryLog};
    use crate::observer::TracingObserver;
    use shardflow_protocol::IteratorPolicy;

    const STREAM: &str = "inventory";

    fn supervisor(log: Arc<MemoryLog>, config: StreamConsumerConfig) -> ShardSupervisor {
        let shared = Shared::new(STREAM, log, config, Arc::new(TracingObserver));
        ShardSupervisor::new(Arc::new(shared))
    }

    #[tokio::test]
    async fn start_spawns_one_poller_per_shard() {
        let log = Arc::new(MemoryLog::new());
        log.create_stream(STREAM, 3);
        let supervisor = supervisor(log, StreamConsumerConfig::new(IteratorPolicy::Latest));

        supervisor.start().await.unwrap();
        let shared = supervisor.shared();
        assert_eq!(shared.registry.live_count(), 3);
        assert!(shared.registry.states().values().all(|s| s.is_ready()));

        supervisor.stop().await;
        assert_eq!(shared.registry.live_count(), 0);
        assert_eq!(shared.registry.known_count(), 3);
    }

    #[tokio::test]
    async fn missing_stream_fails_discovery() {
        let log = Arc::new(MemoryLog::new());
        let supervisor = supervisor(log, StreamConsumerConfig::default());
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Discovery {
                source: LogError::NotFound(_),
                ..
            }
        ));
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_discovery_errors_are_retried() {
        let log = Arc::new(MemoryLog::new());
        log.create_stream(STREAM, 1);
        log.inject_fault(LogOperation::DescribeShards, None, LogError::Timeout);
        log.inject_fault(LogOperation::DescribeShards, None, LogError::Timeout);

        let config = StreamConsumerConfig::new(IteratorPolicy::Latest)
            .with_discovery_attempts(3)
            .with_poll_backoff(BackoffConfig::new(
                Duration::from_millis(10),
                Duration::from_millis(50),
                2.0,
            ));
        let supervisor = supervisor(Arc::clone(&log), config);
        supervisor.start().await.unwrap();
        assert_eq!(log.call_count(LogOperation::DescribeShards, None), 3);
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_gives_up_after_configured_attempts() {
        let log = Arc::new(MemoryLog::new());
        log.create_stream(STREAM, 1);
        for _ in 0..2 {
            log.inject_fault(
                LogOperation::DescribeShards,
                None,
                LogError::transient("connection reset"),
            );
        }

        let config = StreamConsumerConfig::new(IteratorPolicy::Latest).with_discovery_attempts(2);
        let supervisor = supervisor(Arc::clone(&log), config);
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, StreamError::Discovery { .. }));
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn empty_stream_seals_immediately() {
        let log = Arc::new(MemoryLog::new());
        log.create_stream(STREAM, 0);
        let supervisor = supervisor(log, StreamConsumerConfig::default());
        supervisor.start().await.unwrap();

        assert!(supervisor.shared().buffer.consume().await.is_none());
        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rediscovery_only_spawns_unseen_shards() {
        let log = Arc::new(MemoryLog::new());
        let parent = log.create_stream(STREAM, 1).remove(0);
        let config = StreamConsumerConfig::new(IteratorPolicy::TrimHorizon)
            .with_rediscovery_interval(Duration::from_secs(1));
        let supervisor = supervisor(Arc::clone(&log), config);
        supervisor.start().await.unwrap();

        log.split_shard(STREAM, &parent).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let shared = supervisor.shared();
        assert_eq!(shared.registry.known_count(), 2);
        assert_eq!(shared.stats.snapshot().shards_started, 2);
        assert!(shared.stats.snapshot().rediscovery_passes >= 1);

        supervisor.stop().await;
        assert_eq!(shared.registry.live_count(), 0);
    }
}
