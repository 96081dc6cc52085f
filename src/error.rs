//! Error types for the arena observer client.

use thiserror::Error;

/// Errors that can occur when using the observer client.
///
/// Most failures never reach the caller directly: the client absorbs them and
/// surfaces a human-readable message through the
/// [`ConnectionState`](crate::client::ConnectionState) snapshot. This enum is
/// the currency of the transport layer and of internal plumbing.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// The server address does not resolve to an accepted transport scheme.
    #[error("invalid server address: {0} (must start with ws:// or wss://)")]
    InvalidServerUrl(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed and cannot carry further traffic.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for observer client operations.
pub type Result<T> = std::result::Result<T, ObserverError>;
