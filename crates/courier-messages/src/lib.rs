//! # Courier Messages Crate
//!
//! Payload schemas and queue names shared by the services that talk over
//! the request/reply bridge.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every shape that crosses a service
//!   boundary is defined here, never redeclared per service.
//! - **Symmetric schemas**: a request/reply pair shares one struct; the
//!   responder fills in the fields it owns (see
//!   [`UserExistence::is_exists`]).
//! - **Lenient decoding**: responder-owned fields default when absent, so
//!   a bare query decodes on an older or newer peer.

pub mod payloads;
pub mod queues;

pub use payloads::*;
