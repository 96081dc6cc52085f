//! Async observer client for robot-combat battle servers.
//!
//! This crate connects to a battle server over WebSocket, identifies itself
//! with an observer handshake, and streams typed battle events — ticks,
//! bullet hits, bot deaths — to subscriber callbacks. The connection is
//! self-healing: abnormal closures trigger bounded, linear-backoff
//! reconnection, and every transition is published as a [`ConnectionState`]
//! snapshot.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] and [`Connector`]
//!   traits for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   [`WebSocketTransport`]
//! - **Event-driven** — subscribe callbacks per [`EventCategory`]
//! - **Self-healing** — bounded linear-backoff reconnection after abnormal
//!   closures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arena_observer::{EventCategory, ObserverClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ObserverClient::new("ws://localhost:7655");
//!
//!     client.on_connection_state_change(Arc::new(|state| {
//!         println!("connected: {} error: {:?}", state.is_connected, state.error);
//!     }));
//!     client.on(EventCategory::Tick, Arc::new(|tick| {
//!         println!("tick: {tick}");
//!     }));
//!
//!     client.connect().await;
//!     tokio::signal::ctrl_c().await.ok();
//!     client.disconnect();
//! }
//! ```
//!
//! Handlers receive the raw parsed JSON ([`serde_json::Value`]); the typed
//! structs in [`protocol`] deserialize from it when a schema view is wanted.

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ConnectionState, EventHandler, ObserverClient, StateHandler};
pub use error::{ObserverError, Result};
pub use protocol::{classify, Classification, EventCategory, ObserverHandshake};
pub use transport::{Connector, Incoming, Transport, CLOSE_ABNORMAL, CLOSE_NORMAL};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketTransport, WsConnector};
