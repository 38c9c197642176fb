//! # Broker Channel Surface
//!
//! Object-safe traits the RPC layer is written against, plus the consumer
//! and delivery handles shared by every transport.

use crate::error::BrokerError;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tracing::debug;

/// How a consumed delivery leaves the processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; remove the message.
    Ack,
    /// Processing must be retried; return the message to the queue front.
    Requeue,
    /// Processing can never succeed; park the message for inspection.
    DeadLetter,
}

/// Settles one delivery. One handle per delivery, used exactly once.
///
/// Settlement is synchronous so it can also run from `Drop`; transports
/// that need to emit a wire-level acknowledgment do so from an internal
/// task fed by this call.
pub trait Acknowledger: Send + Sync {
    fn settle(&self, disposition: Disposition);
}

/// A message pulled from a queue, waiting to be settled.
///
/// `ack` and `nack` consume the delivery. A delivery dropped without
/// either returns to its queue as redelivered, which models a consumer
/// dying mid-processing.
pub struct Delivery {
    payload: Vec<u8>,
    redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            payload,
            redelivered,
            acker: Some(acker),
        }
    }

    /// Message body bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True when this message was delivered before and came back unacked.
    #[must_use]
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge successful processing.
    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.settle(Disposition::Ack);
        }
    }

    /// Negatively acknowledge. `requeue` returns the message to the queue
    /// front for a future attempt; otherwise it is dead-lettered.
    pub fn nack(mut self, requeue: bool) {
        if let Some(acker) = self.acker.take() {
            acker.settle(if requeue {
                Disposition::Requeue
            } else {
                Disposition::DeadLetter
            });
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            debug!("Delivery dropped without acknowledgment, requeueing");
            acker.settle(Disposition::Requeue);
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

/// Transport-side feed behind a [`Consumer`].
///
/// Dropping the source releases the consumer's queue reference; exclusive
/// queues auto-delete when their last source goes away.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery, waiting until one arrives. `None` once the queue or
    /// channel is gone.
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Non-blocking variant for stream integration.
    fn try_next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;
}

/// Caller-facing handle for consuming one queue.
pub struct Consumer {
    queue: String,
    source: Box<dyn MessageSource>,
}

impl Consumer {
    pub fn new(queue: impl Into<String>, source: Box<dyn MessageSource>) -> Self {
        Self {
            queue: queue.into(),
            source,
        }
    }

    /// Queue this consumer is attached to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Receive the next delivery.
    ///
    /// # Returns
    ///
    /// - `Some(delivery)` - A message is ready for processing
    /// - `None` - The queue was deleted or the channel closed
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.source.next_delivery().await
    }

    /// Try to receive a delivery without blocking.
    pub fn try_recv(&mut self) -> Result<Option<Delivery>, BrokerError> {
        self.source.try_next_delivery()
    }

    /// Convert into a [`Stream`] of deliveries.
    #[must_use]
    pub fn into_stream(self) -> DeliveryStream {
        DeliveryStream::new(self)
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").field("queue", &self.queue).finish()
    }
}

/// A stream wrapper for consumers.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct DeliveryStream {
    consumer: Consumer,
}

impl DeliveryStream {
    #[must_use]
    pub fn new(consumer: Consumer) -> Self {
        Self { consumer }
    }

    /// Queue this stream draws from.
    #[must_use]
    pub fn queue(&self) -> &str {
        self.consumer.queue()
    }
}

impl Stream for DeliveryStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Use try_recv for non-blocking check
        match self.consumer.try_recv() {
            Ok(Some(delivery)) => Poll::Ready(Some(delivery)),
            Ok(None) => {
                // No delivery ready, need to wait
                // Register waker and return pending
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Err(_) => Poll::Ready(None),
        }
    }
}

/// One multiplexed broker channel.
///
/// Implementations must tolerate concurrent use from many tasks; every
/// method takes `&self` and the handle is shared as `Arc<dyn Channel>`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a named work queue. Idempotent; declaring an existing queue
    /// is a no-op.
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Declare an exclusive, auto-delete reply queue with a
    /// broker-generated name. Returns the name.
    async fn declare_reply_queue(&self) -> Result<String, BrokerError>;

    /// Publish a payload routed by queue name. A publish with no matching
    /// queue is silently dropped.
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Attach a consumer to a declared queue.
    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError>;

    /// False once the channel can no longer carry traffic.
    fn is_open(&self) -> bool;
}

/// Transport capability that yields connected channels.
///
/// Connection establishment and retry live behind this seam; everything
/// above it only sees channels.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Channel>, BrokerError>;
}
