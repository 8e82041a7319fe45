//! Session Transport
//!
//! Owns one WebSocket connection and exposes it as a stream of JSON text
//! frames. Sends are serialized behind a mutex so the protocol loop and the
//! keepalive task can share the connection without interleaving frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket-level failures. Fatal to the current session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// Target URL.
        url: String,
        /// Failure detail.
        reason: String,
    },

    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// No inbound traffic within the keepalive timeout.
    #[error("no inbound traffic for {0:?}")]
    KeepaliveTimeout(Duration),
}

/// A duplex channel of JSON text frames.
///
/// Implementations must allow `send` to be called concurrently with a
/// pending `receive`, and `receive` must be cancel safe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame.
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Next text frame, or `None` once the connection is closed.
    async fn receive(&self) -> Result<Option<String>, TransportError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// `Transport` over a tokio-tungstenite WebSocket.
pub struct WsTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    /// Connect to a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        tracing::info!(url, "Connecting to DXLink");
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        let (writer, reader) = stream.split();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    async fn write(&self, message: Message) -> Result<(), TransportError> {
        self.writer.lock().await.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.write(Message::Text(text.into())).await
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Ping(data))) => self.write(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self.writer.lock().await.close().await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Connector producing `WsTransport`s.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(WsTransport::connect(url).await?))
    }
}
