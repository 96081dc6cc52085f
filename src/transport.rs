//! Transport abstraction for the observer protocol.
//!
//! The [`Transport`] trait is a bidirectional text-message channel between
//! the observer and the battle server. The protocol is JSON text frames, so
//! implementations must handle message framing internally (WebSocket frames,
//! length-prefixed TCP, etc.).
//!
//! Unlike a one-shot stream wrapper, the observer client reconnects: it needs
//! to open fresh transports on its own schedule. That seam is the
//! [`Connector`] trait — a factory handed to
//! [`ObserverClient::with_connector`](crate::client::ObserverClient::with_connector),
//! which also keeps the client testable without a live server.

use async_trait::async_trait;

use crate::error::Result;

/// Close code for a normal, requested closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when no status was received — the conventional signal
/// that a server is offline or unreachable.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// One inbound item from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete JSON text frame.
    Text(String),
    /// The peer closed the connection with a code and optional reason text.
    Closed {
        /// Close code (1000 = normal).
        code: u16,
        /// Reason text supplied by the peer; may be empty.
        reason: String,
    },
}

/// A bidirectional text-message transport carrying observer protocol frames.
///
/// Object-safe: the client holds a `Box<dyn Transport>` produced by a
/// [`Connector`].
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) **must** be cancel-safe because the client polls
/// it inside `tokio::select!`. If the returned future is dropped before
/// completion, no frame may be lost.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one complete JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::TransportSend`](crate::ObserverError::TransportSend)
    /// if the frame could not be written.
    async fn send(&mut self, message: String) -> Result<()>;

    /// Receive the next inbound item.
    ///
    /// Returns:
    /// - `Some(Ok(Incoming::Text(_)))` — a complete frame
    /// - `Some(Ok(Incoming::Closed { .. }))` — the peer sent a close frame
    /// - `Some(Err(_))` — a transport-level error
    /// - `None` — the stream ended without a close frame (the client treats
    ///   this as an abnormal [`CLOSE_ABNORMAL`] closure)
    async fn recv(&mut self) -> Option<Result<Incoming>>;

    /// Close the connection with a normal ([`CLOSE_NORMAL`]) code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<()>;
}

/// Factory that opens a fresh [`Transport`] to a server address.
///
/// The client calls this once per connection attempt, including scheduled
/// reconnection attempts. The address passed in is already normalized to the
/// `ws://`/`wss://` scheme family.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`.
    ///
    /// # Errors
    ///
    /// Any error is treated by the client like an abnormal closure: the error
    /// text lands in the connection-state snapshot and a reconnection attempt
    /// is scheduled (up to the retry ceiling).
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}
