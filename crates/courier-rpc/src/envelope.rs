//! # Message Envelope
//!
//! The UTF-8 JSON frame every message travels in:
//!
//! ```json
//! {
//!   "kind": "user_exists",
//!   "correlation_id": "0b8f…",
//!   "reply_to": "amq.gen-…",
//!   "data": { "user_id": "…", "is_exists": false }
//! }
//! ```
//!
//! `kind` names the payload schema, `reply_to` distinguishes a request
//! (destination for the reply) from a response or one-way notification
//! (`null`). Payload types declare their tag through [`MessageKind`] and
//! are validated against it on decode.

use crate::correlation::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ties a payload type to its wire tag.
pub trait MessageKind: Serialize + DeserializeOwned {
    /// Schema tag carried in the envelope's `kind` field.
    const KIND: &'static str;
}

/// Errors from envelope encoding and decoding.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not valid JSON, or a payload that does not match its schema.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope's tag names a different schema than the caller wants.
    #[error("unexpected message kind: expected {expected}, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: String,
    },
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Payload schema tag.
    pub kind: String,
    /// Call identity; copied verbatim from request to reply.
    pub correlation_id: CorrelationId,
    /// Reply destination. `None` on responses and notifications.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Kind-specific payload object.
    pub data: serde_json::Value,
}

impl Envelope {
    /// Request frame: expects a reply at `reply_to`.
    pub fn request<T: MessageKind>(
        correlation_id: CorrelationId,
        reply_to: &str,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            kind: T::KIND.to_string(),
            correlation_id,
            reply_to: Some(reply_to.to_string()),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Response frame: carries the request's correlation id back.
    pub fn response<T: MessageKind>(
        correlation_id: CorrelationId,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            kind: T::KIND.to_string(),
            correlation_id,
            reply_to: None,
            data: serde_json::to_value(payload)?,
        })
    }

    /// One-way frame: nobody waits for it. The fresh correlation id only
    /// serves log correlation.
    pub fn notification<T: MessageKind>(payload: &T) -> Result<Self, EnvelopeError> {
        Ok(Self {
            kind: T::KIND.to_string(),
            correlation_id: CorrelationId::new(),
            reply_to: None,
            data: serde_json::to_value(payload)?,
        })
    }

    /// True when a reply destination is attached.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse wire bytes. Unknown `kind` tags are accepted here; payload
    /// validation happens in [`Envelope::decode_payload`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode `data` as `T`, first checking the schema tag.
    pub fn decode_payload<T: MessageKind>(&self) -> Result<T, EnvelopeError> {
        if self.kind != T::KIND {
            return Err(EnvelopeError::KindMismatch {
                expected: T::KIND,
                found: self.kind.clone(),
            });
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }
}
