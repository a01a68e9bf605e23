//! Transport layer
//!
//! The traits the client core is written against — a connection factory
//! ([`Connector`]), the channel it yields ([`Channel`]), and the
//! bidirectional stream one attempt runs over ([`DiscoveryStream`]) — plus
//! the default WebSocket implementation speaking binary msgpack frames.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::DiscoveryError;
use crate::wire::{decode_response, encode_request, DiscoveryRequest, DiscoveryResponse};

/// One bidirectional discovery stream. Owned by a single attempt; never
/// shared across tasks.
#[async_trait]
pub trait DiscoveryStream: Send {
    async fn send(&mut self, request: &DiscoveryRequest) -> Result<(), DiscoveryError>;

    /// Receive the next response. `Ok(None)` means the peer closed the
    /// stream cleanly.
    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, DiscoveryError>;
}

/// An established channel to the control plane. Streams are opened over it
/// once per attempt; `close()` is terminal and later opens must fail.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn open_stream(&self) -> Result<Box<dyn DiscoveryStream>, DiscoveryError>;
    async fn close(&self);
}

impl std::fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Channel")
    }
}

/// Connection factory. Dialing is non-blocking validation plus channel
/// construction; its errors are fatal configuration errors, not transient
/// network faults.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, config: &ClientConfig) -> Result<Arc<dyn Channel>, DiscoveryError>;
}

/// Default connector: WebSocket channel to the configured endpoint.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn dial(&self, config: &ClientConfig) -> Result<Arc<dyn Channel>, DiscoveryError> {
        if !config.endpoint.starts_with("ws://") && !config.endpoint.starts_with("wss://") {
            return Err(DiscoveryError::Config(format!(
                "Endpoint is not a WebSocket URL: {}",
                config.endpoint
            )));
        }

        // The identity override must be fixed before any network activity.
        let host = config
            .server_name_override
            .clone()
            .unwrap_or_else(|| extract_host(&config.endpoint).to_string());

        debug!(endpoint = %config.endpoint, host = %host, "Dialed control plane");
        Ok(Arc::new(WsChannel {
            url: config.endpoint.clone(),
            host,
            closed: AtomicBool::new(false),
        }))
    }
}

/// WebSocket channel. A socket cannot multiplex streams, so each
/// `open_stream` call performs one connect; `close()` poisons the channel
/// so post-close attempts fail fast.
pub struct WsChannel {
    url: String,
    host: String,
    closed: AtomicBool,
}

#[async_trait]
impl Channel for WsChannel {
    async fn open_stream(&self) -> Result<Box<dyn DiscoveryStream>, DiscoveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Transport("Channel is closed".into()));
        }

        debug!(url = %self.url, "Opening discovery stream");

        let request = Request::builder()
            .uri(self.url.as_str())
            .header("Host", &self.host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| DiscoveryError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| DiscoveryError::Transport(format!("WebSocket connect failed: {}", e)))?;

        debug!(url = %self.url, "Discovery stream open");
        Ok(Box::new(WsStream { ws }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!(url = %self.url, "Channel closed");
    }
}

/// One WebSocket-backed discovery stream.
pub struct WsStream {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl DiscoveryStream for WsStream {
    async fn send(&mut self, request: &DiscoveryRequest) -> Result<(), DiscoveryError> {
        let bytes = encode_request(request)?;
        self.ws
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| DiscoveryError::Transport(format!("Failed to send: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<DiscoveryResponse>, DiscoveryError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => return decode_response(&data).map(Some),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(_))) => {
                    // Pong is handled automatically by tungstenite
                    continue;
                }
                Some(Ok(_)) => continue, // Skip text, pong, frame messages
                Some(Err(e)) => {
                    return Err(DiscoveryError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None), // Stream ended
            }
        }
    }
}

/// Extract host from URL for the Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
