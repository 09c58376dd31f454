//! Transport errors.

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] livedoc_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}
