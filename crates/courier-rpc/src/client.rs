//! # RPC Client
//!
//! Issues requests over the broker and awaits correlated replies.
//!
//! One client owns one exclusive reply queue and one listener task. Any
//! number of concurrent `call`s multiplex over that queue; the listener
//! routes each reply to its caller through the pending-call registry.

use crate::config::ClientConfig;
use crate::correlation::CorrelationId;
use crate::envelope::{Envelope, MessageKind};
use crate::error::CallError;
use crate::pending::{PendingCalls, PendingStats};
use courier_broker::{Channel, ChannelProvider, Consumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Client half of the request/reply bridge.
///
/// Created against an already-connected channel; connection establishment
/// and retry live behind the [`ChannelProvider`]. Dropping the client
/// aborts the listener, which releases the reply queue's only consumer
/// and lets the broker delete it.
pub struct RpcClient {
    channel: Arc<dyn Channel>,
    reply_queue: String,
    pending: Arc<PendingCalls>,
    config: ClientConfig,
    listener: Option<JoinHandle<()>>,
}

impl RpcClient {
    /// Connect a client: acquire a channel, declare the reply queue, and
    /// start the reply listener.
    pub async fn connect(
        provider: &ChannelProvider,
        config: ClientConfig,
    ) -> Result<Self, CallError> {
        config.validate()?;

        let channel = provider.acquire().await?;
        let reply_queue = channel.declare_reply_queue().await?;
        let consumer = channel.consume(&reply_queue).await?;

        let pending = Arc::new(PendingCalls::new());
        let listener = tokio::spawn(reply_listener(consumer, Arc::clone(&pending)));

        debug!(reply_queue = %reply_queue, "Rpc client connected");

        Ok(Self {
            channel,
            reply_queue,
            pending,
            config,
            listener: Some(listener),
        })
    }

    /// Call a remote handler and wait for its reply, bounded by the
    /// configured default timeout.
    pub async fn call<Req, Resp>(&self, queue: &str, request: &Req) -> Result<Resp, CallError>
    where
        Req: MessageKind,
        Resp: MessageKind,
    {
        self.call_with_timeout(queue, request, self.config.call_timeout)
            .await
    }

    /// Call a remote handler with an explicit deadline.
    ///
    /// Publishes a request envelope carrying a fresh correlation id and
    /// this client's reply queue, then waits. On timeout the pending
    /// entry is discarded, so a reply arriving later is dropped as an
    /// orphan rather than delivered to a departed caller.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        queue: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, CallError>
    where
        Req: MessageKind,
        Resp: MessageKind,
    {
        let correlation_id = CorrelationId::new();
        // Register before publishing: the reply must never race the
        // registry entry. An early return below drops the waiter, which
        // removes the entry again.
        let waiter = self.pending.register(correlation_id, queue)?;

        let envelope = Envelope::request(correlation_id, &self.reply_queue, request)?;
        let payload = envelope.to_bytes()?;

        self.channel.declare_queue(queue).await?;
        self.channel.publish(queue, payload).await?;

        debug!(
            correlation_id = %correlation_id,
            queue,
            kind = Req::KIND,
            "Published request"
        );

        match tokio::time::timeout(timeout, waiter.wait()).await {
            Ok(Ok(reply)) => Ok(reply.decode_payload::<Resp>()?),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    queue,
                    timeout_ms = timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(CallError::Timeout { timeout })
            }
        }
    }

    /// Publish a one-way notification. No reply queue is attached and no
    /// pending entry is created; delivery is fire-and-forget.
    pub async fn notify<N: MessageKind>(
        &self,
        queue: &str,
        notification: &N,
    ) -> Result<(), CallError> {
        let envelope = Envelope::notification(notification)?;
        let payload = envelope.to_bytes()?;

        self.channel.declare_queue(queue).await?;
        self.channel.publish(queue, payload).await?;

        debug!(
            correlation_id = %envelope.correlation_id,
            queue,
            kind = N::KIND,
            "Published notification"
        );
        Ok(())
    }

    /// Name of this client's exclusive reply queue
    #[must_use]
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Number of calls currently awaiting replies
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Registry statistics
    #[must_use]
    pub fn stats(&self) -> &PendingStats {
        self.pending.stats()
    }

    /// Stop the listener and fail outstanding calls with
    /// [`CallError::ConnectionLost`].
    ///
    /// Waits for the listener to finish so the reply queue's consumer is
    /// released before this returns.
    pub async fn close(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            let _ = listener.await;
        }
        let failed = self.pending.fail_all();
        if failed > 0 {
            debug!(failed, "Failed outstanding calls on close");
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

/// Routes replies from the exclusive queue to their waiting callers.
///
/// Replies are always settled terminally: resolved replies are acked, and
/// orphans or undecodable frames are acked and dropped. Requeueing a
/// reply could only redeliver it to this same listener.
async fn reply_listener(mut consumer: Consumer, pending: Arc<PendingCalls>) {
    debug!(queue = %consumer.queue(), "Reply listener started");

    while let Some(delivery) = consumer.recv().await {
        match Envelope::from_bytes(delivery.payload()) {
            Ok(envelope) => {
                let correlation_id = envelope.correlation_id;
                pending.resolve(correlation_id, envelope);
                delivery.ack();
            }
            Err(e) => {
                error!(error = %e, "Discarding undecodable reply");
                delivery.ack();
            }
        }
    }

    // Queue or channel gone; nothing can answer the remaining calls.
    let failed = pending.fail_all();
    if failed > 0 {
        warn!(failed, "Reply listener stopped with calls outstanding");
    } else {
        debug!("Reply listener stopped");
    }
}
