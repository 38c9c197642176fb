//! # Courier Broker - Channel Abstraction for RPC Messaging
//!
//! Defines the broker-facing surface the RPC layer is written against:
//! named work queues, exclusive auto-delete reply queues, publish routed
//! by queue name, and explicitly acknowledged consumption.
//!
//! ## Delivery Lifecycle
//!
//! ```text
//! ┌──────────────┐   publish()    ┌──────────────┐   recv()    ┌──────────────┐
//! │  Publisher   │ ─────────────→ │    Queue     │ ──────────→ │   Consumer   │
//! └──────────────┘                └──────────────┘             └──────┬───────┘
//!                                        ↑ requeue                    │
//!                                       │                             ▼
//!                                       │          nack(true)  ┌──────────────┐
//!                                       └──────────────────────┤  Processing  │
//!                                                              └──────┬───────┘
//!                                              ack() / nack(false)    │
//!                                                                     ▼
//!                                                      acked / dead-lettered
//! ```
//!
//! ## Semantics
//!
//! - **At-least-once:** an unacknowledged delivery returns to its queue.
//! - **Default-exchange routing:** the routing key is the queue name; a
//!   publish with no matching queue is dropped, which is what lets replies
//!   to a departed caller die quietly.
//! - **Reply queues:** exclusive, auto-delete, broker-generated names.
//!
//! Transport-level connection establishment is behind the [`Connector`]
//! trait; [`InMemoryBroker`] is the in-process implementation used by the
//! test suites and single-process deployments.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channel;
pub mod config;
pub mod error;
pub mod memory;
pub mod provider;

// Re-export main types
pub use channel::{
    Acknowledger, Channel, Connector, Consumer, Delivery, DeliveryStream, Disposition,
    MessageSource,
};
pub use config::{BrokerConfig, ConfigError};
pub use error::BrokerError;
pub use memory::{InMemoryBroker, InMemoryChannel};
pub use provider::ChannelProvider;

/// Maximum messages a queue buffers before publishes are rejected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Prefix for broker-generated reply queue names.
pub const REPLY_QUEUE_PREFIX: &str = "amq.gen-";
