//! # Pending Call Registry
//!
//! Maps correlation ids to callers awaiting replies. The reply listener
//! resolves entries as responses arrive; everything else about an entry's
//! lifetime is owned by the caller through its [`ReplyWaiter`]:
//!
//! 1. Client mints a correlation id and calls `register()`
//! 2. Client publishes the request and awaits the waiter under a deadline
//! 3. Reply listener receives a response and calls `resolve()`
//! 4. On timeout or cancellation the waiter is dropped, which removes the
//!    entry, so a late reply finds nothing and is dropped as an orphan
//!
//! The registry never expires entries on its own.

use crate::correlation::CorrelationId;
use crate::envelope::Envelope;
use crate::error::CallError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type ReplySender = oneshot::Sender<Result<Envelope, CallError>>;
type ReplyReceiver = oneshot::Receiver<Result<Envelope, CallError>>;

/// A call waiting for its reply.
struct PendingCall {
    /// Channel to the waiting caller
    sender: ReplySender,
    /// When the call was registered
    created_at: Instant,
    /// Target queue (for logging)
    queue: String,
}

/// Statistics for the pending call registry
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls resolved with a reply
    pub total_resolved: AtomicU64,
    /// Total calls failed with an error
    pub total_failed: AtomicU64,
    /// Replies that matched no pending call
    pub total_orphaned: AtomicU64,
    /// Calls abandoned by their caller (timeout or cancellation)
    pub total_abandoned: AtomicU64,
}

/// Concurrent registry of in-flight calls.
///
/// All operations are safe under concurrent invocation; the map
/// serializes register/resolve/fail per correlation id.
pub struct PendingCalls {
    calls: DashMap<CorrelationId, PendingCall>,
    stats: PendingStats,
}

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Register a call under a caller-supplied correlation id.
    ///
    /// Refuses an id that is already live: two calls sharing an id could
    /// receive each other's replies, so the collision fails fast before
    /// anything is published.
    pub fn register(
        self: &Arc<Self>,
        correlation_id: CorrelationId,
        queue: &str,
    ) -> Result<ReplyWaiter, CallError> {
        let (tx, rx) = oneshot::channel();

        match self.calls.entry(correlation_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    queue,
                    "Refusing duplicate correlation id"
                );
                Err(CallError::DuplicateCorrelation(correlation_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(PendingCall {
                    sender: tx,
                    created_at: Instant::now(),
                    queue: queue.to_string(),
                });
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    queue,
                    "Registered pending call"
                );
                Ok(ReplyWaiter {
                    correlation_id,
                    receiver: rx,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    /// Route a reply to its waiting caller.
    ///
    /// Returns false when no call matches: the caller already timed out,
    /// or the reply was duplicated. Orphans are expected under a
    /// multiplexed reply queue and are dropped without error.
    pub fn resolve(&self, correlation_id: CorrelationId, reply: Envelope) -> bool {
        let Some((_, call)) = self.calls.remove(&correlation_id) else {
            self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                "Reply for unknown or expired correlation id, dropping"
            );
            return false;
        };

        let elapsed = call.created_at.elapsed();
        match call.sender.send(Ok(reply)) {
            Ok(()) => {
                self.stats.total_resolved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    queue = %call.queue,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Resolved pending call"
                );
                true
            }
            Err(_) => {
                // Waiter future dropped between removal and send.
                self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    "Caller gone before reply could be delivered"
                );
                false
            }
        }
    }

    /// Fail one call with an error.
    pub fn fail(&self, correlation_id: CorrelationId, error: CallError) -> bool {
        let Some((_, call)) = self.calls.remove(&correlation_id) else {
            return false;
        };

        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %correlation_id,
            queue = %call.queue,
            error = %error,
            "Failed pending call"
        );
        call.sender.send(Err(error)).is_ok()
    }

    /// Fail every outstanding call with `ConnectionLost`.
    ///
    /// Called when the reply listener stops: no reply can arrive anymore,
    /// so waiting out each timeout would only delay the inevitable.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.calls.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.fail(id, CallError::ConnectionLost) {
                failed += 1;
            }
        }
        failed
    }

    /// Remove an entry whose caller gave up. Late replies for it become
    /// orphans.
    fn discard(&self, correlation_id: CorrelationId) {
        if self.calls.remove(&correlation_id).is_some() {
            self.stats.total_abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %correlation_id, "Discarded pending call");
        }
    }

    /// Check if a correlation id is pending
    #[must_use]
    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.calls.contains_key(correlation_id)
    }

    /// Number of currently pending calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

/// The caller's half of one pending call.
///
/// Holds the registry entry alive. Dropping the waiter (directly, or by
/// dropping a timed-out `wait` future) removes the entry, which is the
/// only expiry mechanism the registry has.
pub struct ReplyWaiter {
    correlation_id: CorrelationId,
    receiver: ReplyReceiver,
    registry: Arc<PendingCalls>,
}

impl ReplyWaiter {
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the reply or the call's failure.
    ///
    /// Cancellation safe: dropping this future discards the registry
    /// entry, so no reply can leak to a departed caller.
    pub async fn wait(mut self) -> Result<Envelope, CallError> {
        match (&mut self.receiver).await {
            Ok(result) => result,
            // Sender dropped without resolution: registry itself went away.
            Err(_) => Err(CallError::ConnectionLost),
        }
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.registry.discard(self.correlation_id);
    }
}
