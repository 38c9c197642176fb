//! RPC error taxonomy.
//!
//! `CallError` is what callers see; `HandlerError` is how server handlers
//! classify failures (only transient ones are retried); `ServeError` is
//! what stops a serve loop.

use crate::config::ConfigError;
use crate::correlation::CorrelationId;
use crate::envelope::EnvelopeError;
use courier_broker::BrokerError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to a caller awaiting a reply.
#[derive(Debug, Error)]
pub enum CallError {
    /// Channel or publish failure; not retried at this layer.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Client configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// No reply arrived inside the deadline. Late replies are dropped.
    #[error("call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The reply could not be decoded as the expected type.
    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// A call with this id is already pending; the id generator is broken.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),

    /// The reply listener went away while the call was pending.
    #[error("connection lost while awaiting reply")]
    ConnectionLost,
}

impl CallError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

/// A handler's verdict on one failed request.
///
/// The classification drives the acknowledgment: transient failures are
/// requeued for another attempt, permanent ones are dead-lettered.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// External circumstance (dependency down, lock contention); a retry
    /// may succeed.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request itself can never succeed; retrying would loop.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Errors that stop a serve loop.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Queue declaration or consume failed at startup.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The consume stream ended without a shutdown request.
    #[error("connection lost")]
    ConnectionLost,
}
