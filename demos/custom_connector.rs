//! # Custom Connector Example
//!
//! Shows how to implement the [`Transport`] and [`Connector`] traits with a
//! simple in-process loopback channel. This is useful for:
//!
//! - **Testing** — drive the observer without a real battle server
//! - **Custom backends** — adapt any I/O layer (TCP, QUIC, WebRTC data channels)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_connector
//! ```

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use arena_observer::{
    Connector, EventCategory, Incoming, ObserverClient, ObserverError, Result, Transport,
};

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// A loopback transport that shuttles messages through in-process channels.
///
/// Two halves:
/// - The **client half** (`LoopbackTransport`) implements [`Transport`] and is
///   what the [`Connector`] hands to the observer client.
/// - The **server half** (`LoopbackServer`) lets you inject frames and read
///   what the observer sent — perfect for testing.
pub struct LoopbackTransport {
    /// Frames the observer sends go here (server reads the other end).
    tx: mpsc::UnboundedSender<String>,
    /// Items the server sends arrive here (the observer reads them).
    rx: mpsc::UnboundedReceiver<Incoming>,
}

/// The "server side" of the loopback — use this to drive the conversation.
pub struct LoopbackServer {
    /// Read what the observer sent.
    pub rx: mpsc::UnboundedReceiver<String>,
    /// Send items to the observer (as if they came from a battle server).
    pub tx: mpsc::UnboundedSender<Incoming>,
}

/// Create a connected `(transport, server)` pair.
fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    // Observer → Server channel
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    // Server → Observer channel
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let transport = LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
    };
    let server = LoopbackServer {
        rx: server_rx,
        tx: server_tx,
    };

    (transport, server)
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport and Connector traits
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl Transport for LoopbackTransport {
    /// Send a JSON frame to the "server" side of the loopback.
    async fn send(&mut self, message: String) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|e| ObserverError::TransportSend(e.to_string()))
    }

    /// Receive the next item from the "server" side.
    ///
    /// Returns `None` when the server channel is closed — the observer treats
    /// that as an abnormal closure.
    ///
    /// This method is **cancel-safe** because `mpsc::UnboundedReceiver::recv`
    /// is cancel-safe.
    async fn recv(&mut self) -> Option<Result<Incoming>> {
        self.rx.recv().await.map(Ok)
    }

    /// Close is a no-op for channels — dropping is sufficient.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A connector that hands out one pre-built loopback transport.
pub struct LoopbackConnector {
    transport: StdMutex<Option<LoopbackTransport>>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(ObserverError::TransportClosed)?;
        Ok(Box::new(transport))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the observer and the fake server
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Create the loopback pair and a client wired to it.
    let (transport, mut server) = loopback_pair();
    let connector = Arc::new(LoopbackConnector {
        transport: StdMutex::new(Some(transport)),
    });
    let client = ObserverClient::with_connector("ws://loopback", connector);

    // Subscribe before connecting so no frame is missed.
    client.on(
        EventCategory::Tick,
        Arc::new(|tick| {
            tracing::info!("Event: tick — round {}", tick["roundNumber"]);
        }),
    );
    client.on(
        EventCategory::BotDeath,
        Arc::new(|event| {
            tracing::info!("Event: bot {} died", event["victimId"]);
        }),
    );

    // Watch for the disconnect so we know when the script has played out.
    let (done_tx, mut done_rx) = tokio::sync::watch::channel(false);
    client.on_connection_state_change(Arc::new(move |state| {
        if let Some(error) = &state.error {
            tracing::info!("Connection: {error}");
            let _ = done_tx.send(true);
        }
    }));

    client.connect().await;

    // ── Fake server: read the handshake and play a short battle ─────
    // The observer auto-sends its handshake right after connecting.
    let Some(handshake) = server.rx.recv().await else {
        return Err("server channel closed before the handshake arrived".into());
    };
    tracing::info!("Server received: {handshake}");

    let frames = [
        r#"{"type":"TickEventForObserver","roundNumber":1,"botStates":[],"bulletStates":[],"events":[]}"#,
        r#"{"type":"BotDeathEvent","victimId":2}"#,
        r#"{"type":"TickEventForObserver","roundNumber":1,"botStates":[],"bulletStates":[],"events":[]}"#,
    ];
    for frame in frames {
        server.tx.send(Incoming::Text(frame.to_string()))?;
    }

    // End the session cleanly; code 1000 means no reconnection.
    server.tx.send(Incoming::Closed {
        code: 1000,
        reason: String::new(),
    })?;

    // ── Wait for the observer to process the closure ────────────────
    while !*done_rx.borrow() {
        done_rx.changed().await?;
    }

    client.disconnect();
    tracing::info!("Done — custom connector works!");
    Ok(())
}
