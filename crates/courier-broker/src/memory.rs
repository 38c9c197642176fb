//! # In-Memory Broker
//!
//! Process-local implementation of the channel surface. Carries the same
//! semantics the RPC layer assumes from a real broker: named queues with
//! competing consumers, at-least-once redelivery, exclusive auto-delete
//! reply queues, and per-queue dead-letter parking.
//!
//! Suitable for single-process deployments and the test suites; networked
//! deployments put an AMQP transport behind the same [`Channel`] trait.

use crate::channel::{
    Acknowledger, Channel, Connector, Consumer, Delivery, Disposition, MessageSource,
};
use crate::error::BrokerError;
use crate::{DEFAULT_QUEUE_CAPACITY, REPLY_QUEUE_PREFIX};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

struct QueuedMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

/// One queue: message buffer, wakeups, and lifecycle flags.
struct QueueState {
    name: String,
    capacity: usize,
    /// Owning channel id for exclusive queues.
    owner: Option<Uuid>,
    messages: Mutex<VecDeque<QueuedMessage>>,
    dead_letters: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
    consumers: AtomicUsize,
    deleted: AtomicBool,
}

impl QueueState {
    fn new(name: &str, capacity: usize, owner: Option<Uuid>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            capacity,
            owner,
            messages: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(Vec::new()),
            notify: Notify::new(),
            consumers: AtomicUsize::new(0),
            deleted: AtomicBool::new(false),
        })
    }

    fn work(name: &str, capacity: usize) -> Arc<Self> {
        Self::new(name, capacity, None)
    }

    fn reply(name: &str, capacity: usize, owner: Uuid) -> Arc<Self> {
        Self::new(name, capacity, Some(owner))
    }

    fn is_exclusive(&self) -> bool {
        self.owner.is_some()
    }

    fn publish(&self, payload: Vec<u8>) -> Result<(), BrokerError> {
        {
            let mut messages = self.messages.lock();
            if self.deleted.load(Ordering::Acquire) {
                debug!(queue = %self.name, "Publish to deleted queue dropped");
                return Ok(());
            }
            if messages.len() >= self.capacity {
                return Err(BrokerError::QueueFull {
                    queue: self.name.clone(),
                    capacity: self.capacity,
                });
            }
            messages.push_back(QueuedMessage {
                payload,
                redelivered: false,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Return an unacknowledged message to the queue front.
    ///
    /// Requeues are accepted even at capacity; the bound applies to new
    /// publishes only, so a full queue cannot lose in-flight messages.
    fn requeue(&self, payload: Vec<u8>) {
        {
            let mut messages = self.messages.lock();
            if self.deleted.load(Ordering::Acquire) {
                debug!(queue = %self.name, "Requeue to deleted queue dropped");
                return;
            }
            messages.push_front(QueuedMessage {
                payload,
                redelivered: true,
            });
        }
        self.notify.notify_one();
    }

    fn dead_letter(&self, payload: Vec<u8>) {
        debug!(queue = %self.name, "Message dead-lettered");
        self.dead_letters.lock().push(payload);
    }

    fn pop(&self) -> Option<QueuedMessage> {
        self.messages.lock().pop_front()
    }

    fn depth(&self) -> usize {
        self.messages.lock().len()
    }

    fn delete(&self) {
        self.deleted.store(true, Ordering::Release);
        self.messages.lock().clear();
        self.notify.notify_waiters();
    }
}

/// Settlement handle for one in-memory delivery.
struct InMemoryAcker {
    queue: Arc<QueueState>,
    /// Taken on first settle; guards against double settlement.
    payload: Mutex<Option<Vec<u8>>>,
}

impl Acknowledger for InMemoryAcker {
    fn settle(&self, disposition: Disposition) {
        let Some(payload) = self.payload.lock().take() else {
            return;
        };
        match disposition {
            Disposition::Ack => {
                debug!(queue = %self.queue.name, "Delivery acked");
            }
            Disposition::Requeue => self.queue.requeue(payload),
            Disposition::DeadLetter => self.queue.dead_letter(payload),
        }
    }
}

/// Consumer feed for one queue.
struct InMemorySource {
    queue: Arc<QueueState>,
    inner: Arc<BrokerInner>,
}

impl InMemorySource {
    fn make_delivery(&self, message: QueuedMessage) -> Delivery {
        let acker = Arc::new(InMemoryAcker {
            queue: self.queue.clone(),
            payload: Mutex::new(Some(message.payload.clone())),
        });
        Delivery::new(message.payload, message.redelivered, acker)
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            // Join the waiter list before re-checking, so a wakeup between
            // the check and the await is not lost.
            notified.as_mut().enable();

            if let Some(message) = self.queue.pop() {
                return Some(self.make_delivery(message));
            }
            if self.queue.deleted.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    fn try_next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        if let Some(message) = self.queue.pop() {
            return Ok(Some(self.make_delivery(message)));
        }
        if self.queue.deleted.load(Ordering::Acquire) {
            return Err(BrokerError::QueueNotFound(self.queue.name.clone()));
        }
        Ok(None)
    }
}

impl Drop for InMemorySource {
    fn drop(&mut self) {
        let remaining = self.queue.consumers.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.queue.is_exclusive() {
            self.inner.queues.remove(&self.queue.name);
            self.queue.delete();
            debug!(queue = %self.queue.name, "Auto-deleted exclusive queue");
        } else {
            debug!(queue = %self.queue.name, remaining, "Consumer detached");
        }
    }
}

/// Shared broker state behind every channel.
struct BrokerInner {
    queues: DashMap<String, Arc<QueueState>>,
    queue_capacity: usize,
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
}

/// In-memory broker.
///
/// Cloning yields another handle to the same broker; channels opened from
/// any clone share queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create a broker with the default per-queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a broker with a specific per-queue capacity.
    #[must_use]
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                queues: DashMap::new(),
                queue_capacity,
                messages_published: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Open a channel onto this broker.
    #[must_use]
    pub fn open_channel(&self) -> Arc<InMemoryChannel> {
        let channel = Arc::new(InMemoryChannel {
            id: Uuid::new_v4(),
            inner: self.inner.clone(),
            open: AtomicBool::new(true),
        });
        debug!(channel_id = %channel.id, "Channel opened");
        channel
    }

    /// Number of messages waiting in a queue.
    #[must_use]
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.inner.queues.get(name).map(|q| q.depth())
    }

    /// Dead-lettered payloads of a queue, oldest first.
    #[must_use]
    pub fn dead_letters(&self, name: &str) -> Vec<Vec<u8>> {
        self.inner
            .queues
            .get(name)
            .map(|q| q.dead_letters.lock().clone())
            .unwrap_or_default()
    }

    /// Number of consumers attached to a queue.
    #[must_use]
    pub fn consumer_count(&self, name: &str) -> usize {
        self.inner
            .queues
            .get(name)
            .map(|q| q.consumers.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn queue_exists(&self, name: &str) -> bool {
        self.inner.queues.contains_key(name)
    }

    /// Administratively delete a queue, waking its consumers with `None`.
    pub fn delete_queue(&self, name: &str) -> bool {
        match self.inner.queues.remove(name) {
            Some((_, state)) => {
                state.delete();
                debug!(queue = name, "Queue deleted");
                true
            }
            None => false,
        }
    }

    /// Total publish attempts across all channels.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }

    /// Publishes dropped because no queue matched the routing key.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.inner.messages_dropped.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        Ok(self.open_channel())
    }
}

/// A channel onto an [`InMemoryBroker`].
pub struct InMemoryChannel {
    id: Uuid,
    inner: Arc<BrokerInner>,
    open: AtomicBool,
}

impl InMemoryChannel {
    /// Mark the channel unusable. Subsequent operations fail with
    /// [`BrokerError::ChannelClosed`]; used to exercise reconnect paths.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        debug!(channel_id = %self.id, "Channel closed");
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        match self.inner.queues.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {}
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(QueueState::work(name, self.inner.queue_capacity));
                debug!(queue = name, "Queue declared");
            }
        }
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<String, BrokerError> {
        self.ensure_open()?;
        let name = format!("{}{}", REPLY_QUEUE_PREFIX, Uuid::new_v4().simple());
        self.inner.queues.insert(
            name.clone(),
            QueueState::reply(&name, self.inner.queue_capacity, self.id),
        );
        debug!(queue = %name, "Reply queue declared");
        Ok(name)
    }

    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.inner.messages_published.fetch_add(1, Ordering::Relaxed);
        match self.inner.queues.get(routing_key) {
            Some(queue) => queue.publish(payload),
            None => {
                // No binding, no error: replies to departed callers land here.
                self.inner.messages_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(routing_key, "Unroutable message dropped");
                Ok(())
            }
        }
    }

    async fn consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        self.ensure_open()?;
        let state = self
            .inner
            .queues
            .get(queue)
            .map(|entry| entry.clone())
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;

        if state.is_exclusive() && state.owner != Some(self.id) {
            return Err(BrokerError::ExclusiveQueue(queue.to_string()));
        }

        state.consumers.fetch_add(1, Ordering::AcqRel);
        debug!(queue, "Consumer attached");
        Ok(Consumer::new(
            queue,
            Box::new(InMemorySource {
                queue: state,
                inner: self.inner.clone(),
            }),
        ))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
