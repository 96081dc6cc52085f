//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries observer protocol frames over a WebSocket
//! connection. Both `ws://` and `wss://` addresses are supported — TLS is
//! handled transparently via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//! [`WsConnector`] is the matching [`Connector`] used by the default client
//! constructor.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::{ObserverError, Result};
use crate::transport::{Connector, Incoming, Transport};

/// Reason text sent with the close frame on a requested disconnect.
const CLOSE_REASON: &str = "client disconnecting";

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a `tokio-tungstenite` WebSocket connection.
///
/// Translates between observer protocol text frames and WebSocket frames:
/// ping/pong is answered inside tungstenite, binary frames are skipped with a
/// warning, and close frames surface as [`Incoming::Closed`] with the peer's
/// code and reason so the client can classify the shutdown.
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) is cancel-safe and may be used inside
/// `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given address.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::Io`] if the address is invalid or the
    /// connection cannot be established. An underlying I/O error keeps its
    /// [`ErrorKind`](std::io::ErrorKind); everything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::debug!(url = %url, "connecting to battle server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            ObserverError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Wrap an already-established WebSocket stream.
    ///
    /// Useful for custom TLS configuration, proxies, or extra headers that
    /// [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        if self.closed {
            return Err(ObserverError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ObserverError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Incoming>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(ObserverError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(Incoming::Text(text.to_string()))),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.to_string()),
                        // No status code on the wire; RFC 6455 reserves 1005
                        // for exactly this case.
                        None => (1005, String::new()),
                    };
                    return Some(Ok(Incoming::Closed { code, reason }));
                }
                Message::Ping(_) => {
                    // tungstenite auto-queues a Pong reply.
                    tracing::debug!("received WebSocket ping");
                }
                Message::Pong(_) => {
                    tracing::debug!("received WebSocket pong (ignored)");
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; kept for exhaustiveness.
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: CLOSE_REASON.into(),
            }))
            .await
            .map_err(|e| ObserverError::TransportSend(e.to_string()))
    }
}

/// The default [`Connector`]: opens a [`WebSocketTransport`] per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let transport = WebSocketTransport::connect(url).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        let err = result.unwrap_err();
        assert!(matches!(err, ObserverError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        let err = result.unwrap_err();
        assert!(matches!(err, ObserverError::Io(_)));
    }

    // ── Mock-server helpers ──────────────────────────────────────────

    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_receives_text_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.send(Message::Text("world".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        let msg1 = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg1, Incoming::Text("hello".into()));

        let msg2 = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg2, Incoming::Text("world".into()));
    }

    #[tokio::test]
    async fn close_frame_surfaces_code_and_reason() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "server restarting".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let item = transport.recv().await.unwrap().unwrap();
        assert_eq!(
            item,
            Incoming::Closed {
                code: 1001,
                reason: "server restarting".into(),
            }
        );
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        // The binary frame should be silently skipped.
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, Incoming::Text("after_binary".into()));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, ObserverError::TransportClosed));
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_sends_normal_close_frame() {
        let (frame_tx, frame_rx) = tokio::sync::oneshot::channel();
        let url = start_mock_server(|mut ws| async move {
            // Read until the client's close frame arrives and forward it.
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(frame) = msg {
                    let _ = frame_tx.send(frame);
                    break;
                }
            }
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();

        let frame = frame_rx.await.unwrap().unwrap();
        assert_eq!(u16::from(frame.code), 1000);
        assert_eq!(frame.reason.as_str(), CLOSE_REASON);
    }

    #[tokio::test]
    async fn from_stream_constructor_works() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("from_stream_msg".into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let mut transport = WebSocketTransport::from_stream(ws_stream);

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, Incoming::Text("from_stream_msg".into()));
    }

    #[tokio::test]
    async fn ws_connector_opens_transport() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("via_connector".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WsConnector.connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, Incoming::Text("via_connector".into()));
    }
}
