//! # Request Server
//!
//! Consumes a work queue one delivery at a time, runs each request
//! through a typed handler inside a unit of work, and settles every
//! delivery exactly once:
//!
//! - handler success: reply published (when requested), then ack
//! - transient failure: rollback, requeue for another attempt
//! - permanent failure or undecodable frame: rollback, dead-letter
//!
//! A request that can never decode must never be requeued; blind requeue
//! turns one poison message into an infinite redelivery loop.

use crate::correlation::CorrelationId;
use crate::envelope::{Envelope, MessageKind};
use crate::error::{HandlerError, ServeError};
use async_trait::async_trait;
use courier_broker::{Channel, ChannelProvider, Delivery};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Application logic for one request kind.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    type Request: MessageKind + Send;
    type Response: MessageKind + Send;

    /// Handle one decoded request. The returned [`HandlerError`]
    /// classification decides between requeue and dead-letter.
    async fn handle(&self, request: Self::Request) -> Result<Self::Response, HandlerError>;
}

/// Failure inside the transactional bracket.
///
/// Always treated as transient: the delivery is requeued and retried
/// once the resource recovers.
#[derive(Debug, Error)]
#[error("unit of work failure: {0}")]
pub struct UnitOfWorkError(pub String);

/// Transactional bracket around each handled request.
///
/// `begin` runs before the handler; `commit` after success, `rollback`
/// after any failure. Servers for stateless handlers use
/// [`NoopUnitOfWork`].
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<(), UnitOfWorkError>;
    async fn commit(&self) -> Result<(), UnitOfWorkError>;
    async fn rollback(&self) -> Result<(), UnitOfWorkError>;
}

/// Unit of work with no backing resource.
pub struct NoopUnitOfWork;

#[async_trait]
impl UnitOfWork for NoopUnitOfWork {
    async fn begin(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }

    async fn commit(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), UnitOfWorkError> {
        Ok(())
    }
}

/// Requests shutdown of a running serve loop.
///
/// Cheap to clone; any clone can trigger shutdown. The loop finishes the
/// in-flight delivery before it stops.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        // Fails only when the server is already gone.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Server half of the request/reply bridge.
///
/// One server consumes one queue with one handler type. Deliveries are
/// processed strictly sequentially, so a transient failure's requeue is
/// observed by the next iteration of the same loop.
pub struct RpcServer<H: RequestHandler> {
    channel: Arc<dyn Channel>,
    handler: Arc<H>,
    unit_of_work: Arc<dyn UnitOfWork>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H: RequestHandler + 'static> RpcServer<H> {
    /// Bind a server to a channel from the provider. The queue is chosen
    /// at [`serve`](Self::serve) time.
    pub async fn bind(provider: &ChannelProvider, handler: H) -> Result<Self, ServeError> {
        let channel = provider.acquire().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            channel,
            handler: Arc::new(handler),
            unit_of_work: Arc::new(NoopUnitOfWork),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Replace the unit of work bracketing each request.
    #[must_use]
    pub fn with_unit_of_work(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.unit_of_work = unit_of_work;
        self
    }

    /// Handle for requesting shutdown; grab one before calling `serve`.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Consume `queue` until shutdown is requested.
    ///
    /// Returns `Ok(())` on orderly shutdown and
    /// [`ServeError::ConnectionLost`] if the consume stream ends first.
    pub async fn serve(mut self, queue: &str) -> Result<(), ServeError> {
        self.channel.declare_queue(queue).await?;
        let mut consumer = self.channel.consume(queue).await?;

        info!(queue, kind = H::Request::KIND, "Request server started");

        loop {
            let delivery = tokio::select! {
                delivery = consumer.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        warn!(queue, "Consume stream ended");
                        return Err(ServeError::ConnectionLost);
                    }
                },
                // A recv future cancelled here after pulling a delivery
                // drops it un-acked, which requeues it. Nothing is lost
                // on the shutdown path.
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            self.process(delivery).await;
        }

        info!(queue, "Request server stopped");
        Ok(())
    }

    /// Take one delivery through decode, unit of work, handler, and
    /// settlement. Never tears the serve loop down; every failure mode
    /// ends in exactly one ack/nack.
    async fn process(&self, delivery: Delivery) {
        let redelivered = delivery.redelivered();

        let envelope = match Envelope::from_bytes(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Dead-lettering undecodable request");
                delivery.nack(false);
                return;
            }
        };
        let correlation_id = envelope.correlation_id;

        if redelivered {
            warn!(correlation_id = %correlation_id, "Processing redelivered request");
        }

        let request: H::Request = match envelope.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Dead-lettering malformed request payload"
                );
                delivery.nack(false);
                return;
            }
        };

        if let Err(e) = self.unit_of_work.begin().await {
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Unit of work begin failed, requeueing"
            );
            delivery.nack(true);
            return;
        }

        match self.handler.handle(request).await {
            Ok(response) => {
                self.settle_success(delivery, correlation_id, envelope.reply_to.as_deref(), &response)
                    .await;
            }
            Err(HandlerError::Transient(reason)) => {
                warn!(
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "Transient handler failure, requeueing"
                );
                self.try_rollback(correlation_id).await;
                delivery.nack(true);
            }
            Err(HandlerError::Permanent(reason)) => {
                error!(
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "Permanent handler failure, dead-lettering"
                );
                self.try_rollback(correlation_id).await;
                delivery.nack(false);
            }
        }
    }

    /// Settle a handled request: encode the reply, commit, publish, ack.
    ///
    /// The reply is encoded before commit so an unencodable response
    /// rolls back instead of leaving committed state with the caller
    /// unanswered. Publish happens after commit; a publish failure
    /// requeues the request, because the caller cannot be answered any
    /// other way.
    async fn settle_success(
        &self,
        delivery: Delivery,
        correlation_id: CorrelationId,
        reply_to: Option<&str>,
        response: &H::Response,
    ) {
        let reply = match reply_to {
            Some(reply_to) => {
                let encoded = Envelope::response(correlation_id, response)
                    .and_then(|envelope| envelope.to_bytes());
                match encoded {
                    Ok(bytes) => Some((reply_to, bytes)),
                    Err(e) => {
                        error!(
                            correlation_id = %correlation_id,
                            error = %e,
                            "Response failed to encode, dead-lettering request"
                        );
                        self.try_rollback(correlation_id).await;
                        delivery.nack(false);
                        return;
                    }
                }
            }
            // Notification mode: handled, nothing to send back.
            None => None,
        };

        if let Err(e) = self.unit_of_work.commit().await {
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Unit of work commit failed, requeueing"
            );
            delivery.nack(true);
            return;
        }

        if let Some((reply_to, bytes)) = reply {
            if let Err(e) = self.channel.publish(reply_to, bytes).await {
                warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Reply publish failed, requeueing request"
                );
                delivery.nack(true);
                return;
            }
            debug!(correlation_id = %correlation_id, reply_to, "Published reply");
        }

        delivery.ack();
        debug!(correlation_id = %correlation_id, "Request acknowledged");
    }

    async fn try_rollback(&self, correlation_id: CorrelationId) {
        if let Err(e) = self.unit_of_work.rollback().await {
            error!(
                correlation_id = %correlation_id,
                error = %e,
                "Unit of work rollback failed"
            );
        }
    }
}
