//! Per-shard diagnostics.
//!
//! Shard failures never reach the record sequence. They are reported here
//! instead, so operators can see a degraded consumer without the caller
//! having to handle per-shard errors.

use crate::error::LogError;
use shardflow_protocol::{ShardDescriptor, ShardId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle event of a shard poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEvent {
    /// A shard was discovered and a poller is being spawned for it.
    Discovered {
        /// The shard.
        shard: ShardDescriptor,
    },
    /// The poller acquired its iterator and started polling.
    Ready {
        /// The shard.
        shard_id: ShardId,
    },
    /// The shard was read to its natural end.
    Exhausted {
        /// The shard.
        shard_id: ShardId,
    },
    /// The shard failed fatally; its poller has stopped.
    Failed {
        /// The shard.
        shard_id: ShardId,
        /// Cause of the failure.
        error: LogError,
    },
    /// The poller stopped because the consumer was closed.
    Stopped {
        /// The shard.
        shard_id: ShardId,
    },
}

impl ShardEvent {
    /// Returns the shard this event refers to.
    pub fn shard_id(&self) -> &ShardId {
        match self {
            ShardEvent::Discovered { shard } => &shard.id,
            ShardEvent::Ready { shard_id }
            | ShardEvent::Exhausted { shard_id }
            | ShardEvent::Failed { shard_id, .. }
            | ShardEvent::Stopped { shard_id } => shard_id,
        }
    }
}

/// Receives shard lifecycle events.
///
/// Called from poller tasks; implementations must not block.
pub trait ShardObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &ShardEvent);
}

/// Logs shard events through `tracing`. The default observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ShardObserver for TracingObserver {
    fn on_event(&self, event: &ShardEvent) {
        match event {
            ShardEvent::Discovered { shard } => debug!(
                shard_id = %shard.id,
                parent_id = ?shard.parent_id.as_ref().map(|p| p.as_str()),
                "shard discovered"
            ),
            ShardEvent::Ready { shard_id } => debug!(%shard_id, "shard ready"),
            ShardEvent::Exhausted { shard_id } => info!(%shard_id, "shard exhausted"),
            ShardEvent::Failed { shard_id, error } => {
                warn!(%shard_id, %error, "shard failed, continuing with remaining shards")
            }
            ShardEvent::Stopped { shard_id } => debug!(%shard_id, "shard poller stopped"),
        }
    }
}

/// Forwards shard events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ShardEvent>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ShardEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ShardObserver for ChannelObserver {
    fn on_event(&self, event: &ShardEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}
