//! # Courier RPC - Request/Reply over a Broker Channel
//!
//! The engine that lets services call one another through a message
//! broker as if performing a synchronous call: correlation ids, the JSON
//! wire envelope, the pending-call registry, and the client and server
//! runtimes.
//!
//! ## Call Flow
//!
//! ```text
//!  caller              RpcClient                broker               RpcServer
//!    │  call(queue, P)     │                       │                     │
//!    ├────────────────────►│ register(c)           │                     │
//!    │                     ├───── publish ────────►│───── deliver ──────►│
//!    │                     │   {c, reply_to, P}    │                     │ handler in
//!    │                     │                       │                     │ unit of work
//!    │                     │◄───── deliver ────────│◄──── publish ───────┤
//!    │◄────────────────────┤ resolve(c) → R        │     {c, R}          │
//! ```
//!
//! One [`RpcClient`] multiplexes any number of concurrent calls over a
//! single exclusive reply queue; replies are matched by correlation id,
//! and a reply whose id matches no pending call is dropped as an orphan.
//! One [`RpcServer`] consumes one queue sequentially and settles every
//! delivery exactly once: ack on success, requeue on transient failure,
//! dead-letter on permanent failure or undecodable input.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod server;

// Re-export main types
pub use client::RpcClient;
pub use config::{ClientConfig, ConfigError, DEFAULT_CALL_TIMEOUT};
pub use correlation::CorrelationId;
pub use envelope::{Envelope, EnvelopeError, MessageKind};
pub use error::{CallError, HandlerError, ServeError};
pub use pending::{PendingCalls, PendingStats, ReplyWaiter};
pub use server::{
    NoopUnitOfWork, RequestHandler, RpcServer, ServerHandle, UnitOfWork, UnitOfWorkError,
};
