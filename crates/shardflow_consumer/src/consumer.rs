//! The public stream consumer.

use crate::client::LogClient;
use crate::config::StreamConsumerConfig;
use crate::error::{StreamError, StreamResult};
use crate::observer::{ShardObserver, TracingObserver};
use crate::poller::PollerState;
use crate::stats::ConsumerStats;
use crate::supervisor::{Shared, ShardSupervisor};
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use shardflow_protocol::{ChangeRecord, Checkpoint, ShardId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready,
    Failed(StreamError),
}

/// Reads every shard of a stream and merges their records into one
/// backpressured, pull-based sequence.
///
/// # Example
///
/// ```rust,ignore
/// use shardflow_consumer::{MemoryLog, StreamConsumer, StreamConsumerConfig};
/// use shardflow_protocol::IteratorPolicy;
/// use std::sync::Arc;
///
/// let log = Arc::new(MemoryLog::new());
/// log.create_stream("orders", 2);
///
/// let config = StreamConsumerConfig::new(IteratorPolicy::TrimHorizon);
/// let consumer = StreamConsumer::start(log, "orders", config)?;
/// consumer.ready().await?;
///
/// while let Some(record) = consumer.next().await {
///     println!("{} {}", record.shard_id, record.sequence_number);
/// }
/// consumer.close().await;
/// ```
pub struct StreamConsumer {
    id: Uuid,
    supervisor: Arc<ShardSupervisor>,
    readiness: watch::Receiver<Readiness>,
    positions: Mutex<Checkpoint>,
    closed: AtomicBool,
}

impl StreamConsumer {
    /// Starts consuming `stream_id`, logging shard events through `tracing`.
    ///
    /// Returns immediately; discovery runs in the background. Use
    /// [`ready`](Self::ready) to wait for it. Must be called from within a
    /// Tokio runtime.
    pub fn start<C: LogClient>(
        client: Arc<C>,
        stream_id: impl Into<String>,
        config: StreamConsumerConfig,
    ) -> StreamResult<Self> {
        Self::start_with_observer(client, stream_id, config, Arc::new(TracingObserver))
    }

    /// Starts consuming `stream_id`, reporting shard events to `observer`.
    pub fn start_with_observer<C: LogClient>(
        client: Arc<C>,
        stream_id: impl Into<String>,
        config: StreamConsumerConfig,
        observer: Arc<dyn ShardObserver>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|e| StreamError::Runtime(e.to_string()))?;

        let id = Uuid::new_v4();
        let stream_id = stream_id.into();
        let client: Arc<dyn LogClient> = client;
        let shared = Arc::new(Shared::new(stream_id.clone(), client, config, observer));
        let supervisor = Arc::new(ShardSupervisor::new(shared));

        let (ready_tx, readiness) = watch::channel(Readiness::Pending);
        let startup = Arc::clone(&supervisor);
        let span = info_span!("stream_consumer", consumer_id = %id, %stream_id);
        supervisor.shared().tracker.spawn_on(
            async move {
                match startup.start().await {
                    Ok(()) => {
                        info!("consumer ready");
                        ready_tx.send_replace(Readiness::Ready);
                    }
                    Err(error) => {
                        if error != StreamError::Closed {
                            warn!(%error, "consumer failed to start");
                        }
                        startup.shared().buffer.close();
                        ready_tx.send_replace(Readiness::Failed(error));
                    }
                }
            }
            .instrument(span),
            &handle,
        );

        Ok(Self {
            id,
            supervisor,
            readiness,
            positions: Mutex::new(Checkpoint::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Waits until every initial shard has a live cursor or has stopped.
    ///
    /// Fails with [`StreamError::Discovery`] if the stream could not be
    /// listed, or [`StreamError::Closed`] if the consumer was closed first.
    pub async fn ready(&self) -> StreamResult<()> {
        let mut readiness = self.readiness.clone();
        let state = readiness
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map_err(|_| StreamError::Closed)?;
        match &*state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(error) => Err(error.clone()),
            Readiness::Pending => Err(StreamError::Closed),
        }
    }

    /// Pulls the next record.
    ///
    /// Waits while no record is buffered. Returns `None` once the consumer
    /// is closed, discovery failed, or every shard has been read to its end
    /// and the remaining records were delivered. Once `None` is returned the
    /// sequence stays finished.
    pub async fn next(&self) -> Option<ChangeRecord> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let shared = self.supervisor.shared();
        let record = shared.buffer.consume().await?;
        self.positions
            .lock()
            .observe(&record.shard_id, &record.sequence_number);
        shared.stats.record_delivered();
        Some(record)
    }

    /// Returns the records as a lazy [`Stream`].
    pub fn records(&self) -> impl Stream<Item = ChangeRecord> + '_ {
        stream::unfold(self, |consumer| async move {
            consumer.next().await.map(|record| (record, consumer))
        })
    }

    /// Stops every poller and waits for them to exit.
    ///
    /// Records not yet delivered are discarded. Idempotent, never fails,
    /// and safe to call before [`ready`](Self::ready) resolves.
    pub async fn close(&self) {
        self.supervisor.stop().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(consumer_id = %self.id, stream_id = %self.stream_id(), "consumer closed");
        }
    }

    /// Returns true once [`close`](Self::close) has completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unique ID of this consumer instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The stream being consumed.
    pub fn stream_id(&self) -> &str {
        &self.supervisor.shared().stream_id
    }

    /// Last delivered sequence number per shard.
    ///
    /// Pass it to [`StreamConsumerConfig::with_checkpoint`] to resume.
    pub fn positions(&self) -> Checkpoint {
        self.positions.lock().clone()
    }

    /// Activity counters.
    pub fn stats(&self) -> ConsumerStats {
        self.supervisor.shared().stats.snapshot()
    }

    /// Number of pollers that have not yet exited.
    pub fn active_pollers(&self) -> usize {
        self.supervisor.shared().registry.live_count()
    }

    /// Number of distinct shards seen since start, live or not.
    pub fn known_shards(&self) -> usize {
        self.supervisor.shared().registry.known_count()
    }

    /// State of each live poller.
    pub fn shard_states(&self) -> HashMap<ShardId, PollerState> {
        self.supervisor.shared().registry.states()
    }

    /// Number of records buffered but not yet delivered.
    pub fn buffered(&self) -> usize {
        self.supervisor.shared().buffer.len()
    }
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        // Pollers notice the token and exit on their own.
        let shared = self.supervisor.shared();
        shared.shutdown.cancel();
        shared.buffer.close();
        shared.tracker.close();
    }
}
