//! Server error types.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Read or write failure on a client transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A subscriber's outbound buffer was full at publish time.
    #[error("outbound queue overflow for connection {0}")]
    QueueOverflow(ConnectionId),

    /// A subscriber's outbound buffer has no reader left.
    #[error("outbound buffer closed for connection {0}")]
    BufferClosed(ConnectionId),

    /// The hub coordinator has stopped.
    #[error("hub is closed")]
    HubClosed,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] skyliner_proto::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
