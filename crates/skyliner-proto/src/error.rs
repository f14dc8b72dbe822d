//! Protocol error types.

use thiserror::Error;

use crate::event::EventType;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The `data` object does not have the shape required by `type`.
    #[error("payload does not match event type {expected}: {reason}")]
    PayloadMismatch { expected: EventType, reason: String },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
