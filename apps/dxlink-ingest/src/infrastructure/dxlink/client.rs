//! DXLink Streaming Client
//!
//! Owns the session lifecycle: obtains a quote token, connects, drives a
//! fresh [`Session`] through the handshake, runs the keepalive task beside
//! the receive loop and forwards decoded events. Failed sessions are torn
//! down completely and rebuilt after an exponential backoff delay.
//!
//! # Failure handling
//!
//! - Transport and protocol failures recycle the session and are retried
//!   indefinitely (or up to `max_attempts`).
//! - A rejected session token halts the client with `DxLinkClientError::Auth`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::{CodecError, DxLinkCodec};
use super::keepalive::{ActivityTracker, KeepaliveConfig, KeepaliveFailure, KeepaliveHandle};
use super::messages::OutboundMessage;
use super::protocol::{ProtocolError, Session, SessionConfig, Step};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::transport::{Connector, Transport, TransportError};
use crate::application::ports::{AuthError, QuoteToken, TokenProvider};
use crate::domain::market::MarketEvent;
use crate::domain::subscription::{SubscriptionChanges, SubscriptionEntry, SubscriptionManager};
use crate::infrastructure::config::{DxLinkSettings, SessionToken};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a session or the whole client.
#[derive(Debug, thiserror::Error)]
pub enum DxLinkClientError {
    /// Quote token could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Fatal protocol condition.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// `run` was called more than once.
    #[error("client is already running")]
    AlreadyRunning,
}

impl DxLinkClientError {
    /// Check if the reconnect loop should try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_retryable(),
            Self::Transport(_) | Self::Protocol(_) | Self::Codec(_) => true,
            Self::MaxReconnectAttemptsExceeded | Self::AlreadyRunning => false,
        }
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Socket connected, handshake starting.
    Connected {
        /// Session id.
        connection_id: Uuid,
    },
    /// Feed subscribed, data flowing.
    Streaming,
    /// Session ended.
    Disconnected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// Decoded market event.
    Market(MarketEvent),
    /// Fatal diagnostic before the client stops.
    Error(String),
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the DXLink client.
#[derive(Debug, Clone)]
pub struct DxLinkClientConfig {
    /// Brokerage session token exchanged for quote tokens.
    pub session_token: SessionToken,
    /// Per-session protocol settings.
    pub session: SessionConfig,
    /// Keepalive configuration.
    pub keepalive: KeepaliveConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Validity a cached quote token must have left to be reused.
    pub token_refresh_margin: Duration,
}

impl DxLinkClientConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new(session_token: SessionToken) -> Self {
        Self::from_settings(session_token, &DxLinkSettings::default())
    }

    /// Create a configuration from the DXLink settings.
    #[must_use]
    pub fn from_settings(session_token: SessionToken, settings: &DxLinkSettings) -> Self {
        Self {
            session_token,
            session: SessionConfig {
                feed_channel: settings.feed_channel,
                keepalive_timeout_secs: settings.keepalive_timeout.as_secs(),
                ..SessionConfig::default()
            },
            keepalive: KeepaliveConfig::from_settings(settings),
            reconnect: ReconnectConfig::from_settings(settings),
            token_refresh_margin: Duration::from_secs(5 * 60),
        }
    }
}

// =============================================================================
// DXLink Client
// =============================================================================

/// DXLink WebSocket client for market data.
pub struct DxLinkClient {
    config: DxLinkClientConfig,
    codec: DxLinkCodec,
    token_provider: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    subscriptions: Arc<SubscriptionManager>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    commands_tx: mpsc::UnboundedSender<SubscriptionChanges>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionChanges>>>,
    cached_token: Mutex<Option<QuoteToken>>,
}

impl DxLinkClient {
    /// Create a new client.
    ///
    /// `subscriptions` is the full set sent with `reset: true` whenever a
    /// session starts streaming.
    #[must_use]
    pub fn new(
        config: DxLinkClientConfig,
        token_provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
        subscriptions: Arc<SubscriptionManager>,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            codec: DxLinkCodec::new(),
            token_provider,
            connector,
            subscriptions,
            event_tx,
            cancel,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            cached_token: Mutex::new(None),
        }
    }

    /// Current subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.subscriptions)
    }

    /// Add subscriptions without resetting existing ones.
    ///
    /// Sent immediately while streaming; otherwise included in the next
    /// session's initial subscription.
    pub fn subscribe(&self, entries: impl IntoIterator<Item = SubscriptionEntry>) -> SubscriptionChanges {
        let changes = self.subscriptions.add(entries);
        self.enqueue(&changes);
        changes
    }

    /// Remove subscriptions without resetting the others.
    pub fn unsubscribe(
        &self,
        entries: impl IntoIterator<Item = SubscriptionEntry>,
    ) -> SubscriptionChanges {
        let changes = self.subscriptions.remove(entries);
        self.enqueue(&changes);
        changes
    }

    fn enqueue(&self, changes: &SubscriptionChanges) {
        if changes.is_empty() {
            return;
        }
        metrics::set_subscriptions(self.subscriptions.len());
        if self.commands_tx.send(changes.clone()).is_err() {
            tracing::debug!("Client stopped, subscription change not sent");
        }
    }

    /// Run the connection loop until cancelled or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns `DxLinkClientError::Auth` if the session token is rejected,
    /// `MaxReconnectAttemptsExceeded` once the policy gives up, and
    /// `AlreadyRunning` if called twice.
    pub async fn run(self: Arc<Self>) -> Result<(), DxLinkClientError> {
        let mut commands = self
            .commands_rx
            .lock()
            .take()
            .ok_or(DxLinkClientError::AlreadyRunning)?;
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("DXLink client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut commands, &mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("DXLink client stopped");
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(error = %e, "DXLink streaming halted");
                    let _ = self.event_tx.send(StreamEvent::Error(e.to_string())).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "DXLink session ended");
                    let _ = self.event_tx.send(StreamEvent::Disconnected).await;

                    let Some(delay) = reconnect_policy.next_delay() else {
                        let e = DxLinkClientError::MaxReconnectAttemptsExceeded;
                        let _ = self.event_tx.send(StreamEvent::Error(e.to_string())).await;
                        return Err(e);
                    };
                    let attempt = reconnect_policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to DXLink"
                    );
                    metrics::record_reconnect();
                    let _ = self.event_tx.send(StreamEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("DXLink client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Run one session. Returns `Ok` only when cancelled.
    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SubscriptionChanges>,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), DxLinkClientError> {
        let token = self.quote_token().await?;
        let transport = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = self.connector.connect(&token.websocket_url) => connected?,
        };

        let mut session = Session::new(
            self.config.session.clone(),
            token.token,
            Arc::clone(&self.subscriptions),
        );
        let connection_id = session.connection_id();
        tracing::info!(%connection_id, "DXLink connected");
        let _ = self.event_tx.send(StreamEvent::Connected { connection_id }).await;

        let activity = Arc::new(ActivityTracker::new());
        let mut keepalive = KeepaliveHandle::spawn(
            self.config.keepalive.clone(),
            Arc::clone(&transport),
            Arc::clone(&activity),
        );

        let result = self
            .drive(
                &mut session,
                transport.as_ref(),
                &activity,
                &mut keepalive,
                commands,
                reconnect_policy,
            )
            .await;

        keepalive.stop().await;
        let authenticated = session.is_authenticated();
        session.close();
        metrics::set_streaming(false);
        if let Err(e) = transport.close().await {
            tracing::debug!(%connection_id, error = %e, "Error closing transport");
        }

        if matches!(result, Err(DxLinkClientError::Protocol(_))) && !authenticated {
            tracing::warn!(%connection_id, "Session rejected before authorization, dropping quote token");
            *self.cached_token.lock() = None;
        }

        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        transport: &dyn Transport,
        activity: &ActivityTracker,
        keepalive: &mut KeepaliveHandle,
        commands: &mut mpsc::UnboundedReceiver<SubscriptionChanges>,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), DxLinkClientError> {
        let setup = session.start()?;
        self.send(transport, &setup).await?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                failure = keepalive.failure() => {
                    return Err(match failure {
                        KeepaliveFailure::Timeout(idle) => TransportError::KeepaliveTimeout(idle),
                        KeepaliveFailure::SendFailed(reason) => TransportError::Send(reason),
                    }
                    .into());
                }
                Some(changes) = commands.recv() => {
                    self.apply_changes(session, transport, &changes).await?;
                }
                frame = transport.receive() => {
                    let Some(text) = frame? else {
                        return Err(TransportError::Closed.into());
                    };
                    activity.record_inbound();

                    let message = match self.codec.decode(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::warn!(
                                connection_id = %session.connection_id(),
                                error = %e,
                                "Dropping undecodable frame"
                            );
                            continue;
                        }
                    };
                    metrics::record_frame_received(message.message_type());

                    let step = session.handle(message)?;
                    for outbound in &step.outbound {
                        self.send(transport, outbound).await?;
                    }

                    if step.entered_streaming {
                        reconnect_policy.reset();
                        metrics::set_streaming(true);
                        metrics::set_subscriptions(self.subscriptions.len());
                        let _ = self.event_tx.send(StreamEvent::Streaming).await;
                    }

                    self.publish(session, step).await;
                }
            }
        }
    }

    async fn apply_changes(
        &self,
        session: &Session,
        transport: &dyn Transport,
        changes: &SubscriptionChanges,
    ) -> Result<(), DxLinkClientError> {
        match session.subscription_update(changes) {
            Ok(Some(message)) => {
                tracing::info!(
                    connection_id = %session.connection_id(),
                    added = changes.add.len(),
                    removed = changes.remove.len(),
                    "Updating feed subscription"
                );
                self.send(transport, &message).await
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::debug!(
                    connection_id = %session.connection_id(),
                    reason = %e,
                    "Subscription change deferred until streaming"
                );
                Ok(())
            }
        }
    }

    async fn publish(&self, session: &Session, step: Step) {
        if !step.decode_errors.is_empty() {
            metrics::record_decode_errors(step.decode_errors.len() as u64);
            for error in &step.decode_errors {
                tracing::warn!(
                    connection_id = %session.connection_id(),
                    error = %error,
                    "Failed to decode compact event"
                );
            }
        }
        if step.skipped > 0 {
            tracing::trace!(skipped = step.skipped, "Skipped unknown event types");
        }

        for event in step.events {
            metrics::record_events_decoded(event.kind(), 1);
            if self.event_tx.send(StreamEvent::Market(event)).await.is_err() {
                tracing::debug!("Event receiver dropped");
                return;
            }
        }
    }

    async fn send(
        &self,
        transport: &dyn Transport,
        message: &OutboundMessage,
    ) -> Result<(), DxLinkClientError> {
        let text = self.codec.encode(message)?;
        tracing::debug!(
            message_type = message.message_type(),
            channel = message.channel(),
            "Sending DXLink message"
        );
        transport.send(text).await?;
        Ok(())
    }

    async fn quote_token(&self) -> Result<QuoteToken, DxLinkClientError> {
        let cached = self.cached_token.lock().clone();
        if let Some(token) = cached
            && token.is_valid_at(Utc::now(), self.config.token_refresh_margin)
        {
            tracing::debug!(expires_at = %token.expires_at, "Reusing cached quote token");
            return Ok(token);
        }

        let token = self
            .token_provider
            .quote_token(self.config.session_token.expose())
            .await?;
        tracing::info!(
            websocket_url = %token.websocket_url,
            expires_at = %token.expires_at,
            "Obtained quote token"
        );
        *self.cached_token.lock() = Some(token.clone());
        Ok(token)
    }
}
