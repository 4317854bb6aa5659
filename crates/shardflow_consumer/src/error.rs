//! Error types for the consumer and the log services it reads.

use shardflow_protocol::ShardId;
use thiserror::Error;

/// Result type for log service calls.
pub type LogResult<T> = Result<T, LogError>;

/// Result type for consumer operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors reported by a [`LogClient`](crate::LogClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The stream does not exist or is not in a streamable state.
    #[error("stream not found: {0}")]
    NotFound(String),

    /// The shard was trimmed, expired, or never existed.
    #[error("shard {0} is gone")]
    ShardGone(ShardId),

    /// The iterator is no longer valid.
    #[error("shard iterator expired")]
    ExpiredIterator,

    /// The backend throttled the request.
    #[error("request throttled: {0}")]
    Throttled(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Network or backend hiccup.
    #[error("transient error: {message}")]
    Transient {
        /// Error message.
        message: String,
    },
}

impl LogError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Returns true if the call can be retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            LogError::Transient { .. } | LogError::Throttled(_) | LogError::Timeout => true,
            LogError::NotFound(_) | LogError::ShardGone(_) | LogError::ExpiredIterator => false,
        }
    }
}

/// Errors surfaced by the consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Shard discovery failed; the stream is unusable.
    #[error("shard discovery failed for stream {stream_id}: {source}")]
    Discovery {
        /// Stream that was being discovered.
        stream_id: String,
        /// Underlying log error.
        #[source]
        source: LogError,
    },

    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No Tokio runtime was available to run the consumer's tasks.
    #[error("no tokio runtime: {0}")]
    Runtime(String),

    /// The consumer was closed.
    #[error("consumer closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(LogError::transient("connection reset").is_retryable());
        assert!(LogError::Throttled("slow down".into()).is_retryable());
        assert!(LogError::Timeout.is_retryable());
        assert!(!LogError::ExpiredIterator.is_retryable());
        assert!(!LogError::ShardGone(ShardId::from("s")).is_retryable());
        assert!(!LogError::NotFound("t".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StreamError::Discovery {
            stream_id: "my-table".into(),
            source: LogError::NotFound("my-table".into()),
        };
        assert!(err.to_string().contains("my-table"));
        assert!(err.to_string().contains("stream not found"));
    }
}
