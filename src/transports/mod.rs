//! Transport implementations for the observer protocol.
//!
//! Concrete [`Transport`](crate::Transport)/[`Connector`](crate::Connector)
//! implementations live here behind feature gates:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketTransport, WsConnector};
