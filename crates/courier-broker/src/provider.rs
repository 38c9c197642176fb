//! # Channel Provider
//!
//! Hands out one shared channel to every component that needs the broker,
//! re-establishing it transparently when the transport drops. Injected
//! into clients and servers rather than reached through a global.

use crate::channel::{Channel, Connector};
use crate::error::BrokerError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Caching source of broker channels.
///
/// `acquire` returns the same logical channel to all callers until it
/// stops being open, then connects a new one. Concurrent acquirers never
/// race into separate connections; the slot lock serializes them.
pub struct ChannelProvider {
    connector: Arc<dyn Connector>,
    slot: Mutex<Option<Arc<dyn Channel>>>,
}

impl ChannelProvider {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
        }
    }

    /// Current channel, connecting if there is none or the cached one died.
    ///
    /// A failed connect is not cached; the next call retries from scratch.
    pub async fn acquire(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let mut slot = self.slot.lock().await;

        if let Some(channel) = slot.as_ref() {
            if channel.is_open() {
                return Ok(Arc::clone(channel));
            }
            warn!("Cached channel no longer open, reconnecting");
            *slot = None;
        }

        let channel = self.connector.connect().await?;
        debug!("Broker channel established");
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Drop the cached channel so the next `acquire` reconnects.
    pub async fn reset(&self) {
        self.slot.lock().await.take();
    }

    /// True while a live channel is cached.
    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }
}
