//! Shared integration test doubles.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dxlink_ingest::infrastructure::dxlink::{Connector, Transport, TransportError};
use dxlink_ingest::{AuthError, Bar, QuoteToken, Timeframe, TokenProvider};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

/// How long a test waits for the client before failing.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Scripted Transport
// =============================================================================

/// In-memory transport whose peer is driven by the test.
pub struct ScriptedTransport {
    inbound: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: AtomicUsize,
}

/// The server side of a `ScriptedTransport`.
pub struct ServerEnd {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ScriptedTransport {
    /// Create a connected transport and its server end.
    pub fn pair() -> (Arc<Self>, ServerEnd) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inbound: AsyncMutex::new(inbound),
            outbound,
            closed: AtomicUsize::new(0),
        });
        let server = ServerEnd {
            to_client: Some(to_client),
            from_client,
        };
        (transport, server)
    }

    /// Number of times the client closed this transport.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ServerEnd {
    /// Send one frame to the client.
    pub fn send(&self, frame: Value) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame.to_string());
        }
    }

    /// Next non-keepalive frame from the client.
    pub async fn expect(&mut self, message_type: &str) -> Value {
        loop {
            let frame = tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {message_type}"))
                .unwrap_or_else(|| panic!("client hung up before {message_type}"));
            let value: Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == "KEEPALIVE" {
                continue;
            }
            assert_eq!(value["type"], message_type, "unexpected frame {value}");
            return value;
        }
    }

    /// Next frame from the client, keepalives included. No timeout.
    pub async fn next_raw(&mut self) -> Value {
        let frame = self
            .from_client
            .recv()
            .await
            .expect("client hung up");
        serde_json::from_str(&frame).unwrap()
    }

    /// Drive the server side of a handshake up to streaming.
    ///
    /// Returns the initial `FEED_SUBSCRIPTION` frame.
    pub async fn accept_handshake(&mut self, expected_token: &str) -> Value {
        self.expect("SETUP").await;
        self.send(serde_json::json!({
            "type": "SETUP", "channel": 0, "version": "1.0", "keepaliveTimeout": 60
        }));
        self.send(serde_json::json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}));

        let auth = self.expect("AUTH").await;
        assert_eq!(auth["token"], expected_token);
        self.send(serde_json::json!({
            "type": "AUTH_STATE", "channel": 0, "state": "AUTHORIZED", "userId": "tester"
        }));

        let request = self.expect("CHANNEL_REQUEST").await;
        let channel = request["channel"].clone();
        assert_eq!(request["service"], "FEED");
        self.send(serde_json::json!({"type": "CHANNEL_OPENED", "channel": channel}));

        let setup = self.expect("FEED_SETUP").await;
        assert_eq!(setup["acceptDataFormat"], "COMPACT");
        self.send(serde_json::json!({"type": "FEED_CONFIG", "channel": channel}));

        self.expect("FEED_SUBSCRIPTION").await
    }

    /// Drop the server's sending half so the client sees the socket close.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

// =============================================================================
// Scripted Connector
// =============================================================================

/// Hands out pre-built transports in order; fails once they run out.
#[derive(Default)]
pub struct ScriptedConnector {
    transports: Mutex<VecDeque<Arc<ScriptedTransport>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    /// Connector serving the given transports.
    pub fn new(transports: impl IntoIterator<Item = Arc<ScriptedTransport>>) -> Self {
        Self {
            transports: Mutex::new(transports.into_iter().collect()),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// URLs the client connected to.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.urls.lock().push(url.to_string());
        let next = self.transports.lock().pop_front();
        match next {
            Some(transport) => Ok(transport),
            None => Err(TransportError::Connect {
                url: url.to_string(),
                reason: "no scripted transport left".to_string(),
            }),
        }
    }
}

// =============================================================================
// Stub Token Provider
// =============================================================================

/// Token provider returning a fixed quote token.
pub struct StubTokenProvider {
    token: String,
    url: String,
    calls: AtomicUsize,
}

impl StubTokenProvider {
    /// Provider issuing `token` for `url`.
    pub fn new(token: &str, url: &str) -> Self {
        Self {
            token: token.to_string(),
            url: url.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of quote-token requests served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StubTokenProvider {
    async fn quote_token(&self, session_token: &str) -> Result<QuoteToken, AuthError> {
        if session_token.is_empty() {
            return Err(AuthError::MissingSessionToken);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(QuoteToken::issued_now(self.token.clone(), self.url.clone()))
    }

    async fn streamer_symbol(&self, _session_token: &str, symbol: &str) -> Result<String, AuthError> {
        Ok(symbol.to_string())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Ascending one-minute bars ending at the last whole minute.
pub fn synthetic_bars(symbol: &str, count: usize) -> Vec<Bar> {
    let last_minute = Utc::now().timestamp() / 60 * 60;
    let start = Utc
        .timestamp_opt(last_minute - count as i64 * 60, 0)
        .unwrap();
    (0..count)
        .map(|i| {
            let close = 400.0 + (i as f64 * 0.1).sin() * 2.0 + i as f64 * 0.05;
            Bar {
                symbol: symbol.to_string(),
                timeframe: Timeframe::one_minute(),
                timestamp: start + chrono::Duration::minutes(i as i64),
                open: close - 0.1,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 10_000.0 + (i % 7) as f64 * 500.0,
                day_volume: None,
            }
        })
        .collect()
}
