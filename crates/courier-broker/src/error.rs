//! Broker error types.

use thiserror::Error;

/// Errors surfaced by channel and connection operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport could not produce a channel.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel is no longer usable.
    #[error("channel closed")]
    ChannelClosed,

    /// Consume was attempted on a queue that was never declared.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The queue is at capacity and the publish was rejected.
    #[error("queue {queue} is full (capacity {capacity})")]
    QueueFull { queue: String, capacity: usize },

    /// The queue belongs exclusively to another channel.
    #[error("queue {0} is exclusive to another channel")]
    ExclusiveQueue(String),
}

impl BrokerError {
    /// True when retrying against a freshly acquired channel may succeed.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_) | BrokerError::ChannelClosed
        )
    }
}
