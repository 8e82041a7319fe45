//! DXLink Protocol State Machine
//!
//! Drives one session from `SETUP` to streaming. The machine is pure: it
//! consumes inbound messages and returns the frames to send and the events
//! decoded, leaving I/O to the client.
//!
//! # Transitions
//!
//! ```text
//! Init             --start-->                          SetupSent        (send SETUP)
//! SetupSent        --AUTH_STATE(UNAUTHORIZED)-->       Authenticating   (send AUTH)
//! Authenticating   --AUTH_STATE(AUTHORIZED)-->         ChannelRequested (send CHANNEL_REQUEST)
//! ChannelRequested --CHANNEL_OPENED(feed)-->           FeedConfiguring  (send FEED_SETUP)
//! FeedConfiguring  --FEED_CONFIG(feed)-->              Streaming        (send FEED_SUBSCRIPTION)
//! Streaming        --FEED_DATA(feed)-->                Streaming        (decode)
//! any              --ERROR-->                          Error
//! any              --CHANNEL_CLOSED(feed)-->           Error
//! ```
//!
//! Anything else is logged and ignored. A session is single-use: after
//! `Closed` or `Error` a new `Session` must be built and the handshake
//! repeated from `SETUP`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::compact::{self, DecodeError, EventSchema};
use super::messages::{AuthStateKind, FEED_SERVICE, InboundMessage, OutboundMessage};
use crate::domain::market::MarketEvent;
use crate::domain::subscription::{SubscriptionChanges, SubscriptionManager};

// =============================================================================
// State
// =============================================================================

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Nothing sent yet.
    Init,
    /// `SETUP` sent, waiting for `AUTH_STATE`.
    SetupSent,
    /// `AUTH` sent, waiting for authorization.
    Authenticating,
    /// Feed channel requested.
    ChannelRequested,
    /// `FEED_SETUP` sent, waiting for `FEED_CONFIG`.
    FeedConfiguring,
    /// Subscribed and receiving data.
    Streaming,
    /// Connection closed.
    Closed,
    /// Fatal error received.
    Error,
}

impl ProtocolState {
    /// Check if the session can make no further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// Lowercase name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SetupSent => "setup_sent",
            Self::Authenticating => "authenticating",
            Self::ChannelRequested => "channel_requested",
            Self::FeedConfiguring => "feed_configuring",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// `CHANNEL_REQUEST` sent.
    Requested,
    /// `CHANNEL_OPENED` received.
    Open,
    /// `CHANNEL_CLOSED` received or session ended.
    Closed,
}

/// A logical sub-stream of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel id.
    pub id: u32,
    /// Service name.
    pub service: String,
    /// Current status.
    pub status: ChannelStatus,
}

// =============================================================================
// Errors
// =============================================================================

/// Fatal protocol conditions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Server sent `ERROR`.
    #[error("server error {error}: {message}")]
    Server {
        /// Error code.
        error: String,
        /// Detail.
        message: String,
    },

    /// Server closed the feed channel.
    #[error("feed channel {0} closed by server")]
    FeedChannelClosed(u32),

    /// A feed message was requested on a channel that is not open.
    #[error("channel {0} is not open")]
    ChannelNotOpen(u32),

    /// Operation not valid in the current state.
    #[error("invalid in state {0}")]
    InvalidState(ProtocolState),
}

// =============================================================================
// Session
// =============================================================================

/// Per-session protocol settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channel id requested for the feed.
    pub feed_channel: u32,
    /// Keepalive timeout announced in `SETUP`, in seconds.
    pub keepalive_timeout_secs: u64,
    /// Aggregation period requested in `FEED_SETUP`, in seconds.
    pub aggregation_period: f64,
    /// Field order requested in `FEED_SETUP`.
    pub schema: EventSchema,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            feed_channel: 3,
            keepalive_timeout_secs: 60,
            aggregation_period: 0.1,
            schema: EventSchema::default_fields(),
        }
    }
}

/// Output of one transition.
#[derive(Debug, Default)]
pub struct Step {
    /// Frames to send, in order.
    pub outbound: Vec<OutboundMessage>,
    /// Decoded market events.
    pub events: Vec<MarketEvent>,
    /// Per-event decode failures.
    pub decode_errors: Vec<DecodeError>,
    /// Compact pairs skipped for unknown event types.
    pub skipped: usize,
    /// The session entered `Streaming` on this step.
    pub entered_streaming: bool,
}

impl Step {
    fn send(message: OutboundMessage) -> Self {
        Self {
            outbound: vec![message],
            ..Self::default()
        }
    }
}

/// One protocol session over one connection.
pub struct Session {
    connection_id: Uuid,
    config: SessionConfig,
    state: ProtocolState,
    quote_token: String,
    authenticated: bool,
    user_id: Option<String>,
    channels: HashMap<u32, Channel>,
    schema: EventSchema,
    subscriptions: Arc<SubscriptionManager>,
}

impl Session {
    /// Create a session in `Init`.
    ///
    /// `subscriptions` is read when the feed is configured; the full set is
    /// sent with `reset: true`.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        quote_token: impl Into<String>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        let schema = config.schema.clone();
        Self {
            connection_id: Uuid::new_v4(),
            config,
            state: ProtocolState::Init,
            quote_token: quote_token.into(),
            authenticated: false,
            user_id: None,
            channels: HashMap::new(),
            schema,
            subscriptions,
        }
    }

    /// Unique id of this session.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// Check if the server authorized this session.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// User id reported at authorization.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Feed channel id.
    #[must_use]
    pub const fn feed_channel(&self) -> u32 {
        self.config.feed_channel
    }

    /// A channel by id.
    #[must_use]
    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Negotiated schema.
    #[must_use]
    pub const fn schema(&self) -> &EventSchema {
        &self.schema
    }

    /// Begin the handshake.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidState` unless the session is in `Init`.
    pub fn start(&mut self) -> Result<OutboundMessage, ProtocolError> {
        if self.state != ProtocolState::Init {
            return Err(ProtocolError::InvalidState(self.state));
        }
        self.transition(ProtocolState::SetupSent);
        Ok(OutboundMessage::setup(self.config.keepalive_timeout_secs))
    }

    /// Apply one inbound message.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for server `ERROR`, closure of the feed
    /// channel, or any message after the session terminated. The session is
    /// unusable afterwards.
    pub fn handle(&mut self, message: InboundMessage) -> Result<Step, ProtocolError> {
        if self.state.is_terminal() {
            return Err(ProtocolError::InvalidState(self.state));
        }

        match message {
            InboundMessage::Error {
                channel,
                error,
                message,
            } => {
                let error = error.unwrap_or_else(|| "UNKNOWN".to_string());
                let message = message.unwrap_or_default();
                tracing::error!(
                    connection_id = %self.connection_id,
                    channel,
                    error = %error,
                    message = %message,
                    state = %self.state,
                    "DXLink server error"
                );
                self.transition(ProtocolState::Error);
                Err(ProtocolError::Server { error, message })
            }
            InboundMessage::ChannelClosed { channel } => self.on_channel_closed(channel),
            InboundMessage::AuthState { state, user_id, .. } => Ok(self.on_auth_state(state, user_id)),
            InboundMessage::ChannelOpened { channel, .. } => Ok(self.on_channel_opened(channel)),
            InboundMessage::FeedConfig {
                channel,
                event_fields,
                ..
            } => Ok(self.on_feed_config(channel, event_fields.as_ref())),
            InboundMessage::FeedData { channel, data } => Ok(self.on_feed_data(channel, &data)),
            InboundMessage::Setup {
                keepalive_timeout,
                version,
                ..
            } => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    server_version = version.as_deref().unwrap_or("unknown"),
                    keepalive_timeout,
                    "Server SETUP received"
                );
                Ok(Step::default())
            }
            InboundMessage::Keepalive { .. } => Ok(Step::default()),
            InboundMessage::Unknown => {
                tracing::debug!(connection_id = %self.connection_id, "Ignoring unknown message type");
                Ok(Step::default())
            }
        }
    }

    /// Frame applying incremental subscription changes with `reset: false`.
    ///
    /// Returns `None` if there is nothing to send.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ChannelNotOpen` unless the session is
    /// streaming on an open feed channel.
    pub fn subscription_update(
        &self,
        changes: &SubscriptionChanges,
    ) -> Result<Option<OutboundMessage>, ProtocolError> {
        let channel = self.config.feed_channel;
        if self.state != ProtocolState::Streaming || !self.is_open(channel) {
            return Err(ProtocolError::ChannelNotOpen(channel));
        }
        if changes.is_empty() {
            return Ok(None);
        }
        Ok(Some(OutboundMessage::feed_subscription(
            channel,
            false,
            changes.add.clone(),
            changes.remove.clone(),
        )))
    }

    /// Mark the session closed. Channels close with it.
    pub fn close(&mut self) {
        for channel in self.channels.values_mut() {
            channel.status = ChannelStatus::Closed;
        }
        if self.state != ProtocolState::Error {
            self.transition(ProtocolState::Closed);
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn on_auth_state(&mut self, state: AuthStateKind, user_id: Option<String>) -> Step {
        match (self.state, state) {
            (ProtocolState::SetupSent, AuthStateKind::Unauthorized) => {
                self.transition(ProtocolState::Authenticating);
                Step::send(OutboundMessage::auth(self.quote_token.clone()))
            }
            (ProtocolState::Authenticating, AuthStateKind::Authorized) => {
                self.authenticated = true;
                self.user_id = user_id;
                tracing::info!(
                    connection_id = %self.connection_id,
                    user_id = self.user_id.as_deref().unwrap_or(""),
                    "DXLink authorized"
                );

                let channel = self.config.feed_channel;
                self.channels.insert(
                    channel,
                    Channel {
                        id: channel,
                        service: FEED_SERVICE.to_string(),
                        status: ChannelStatus::Requested,
                    },
                );
                self.transition(ProtocolState::ChannelRequested);
                Step::send(OutboundMessage::feed_channel_request(channel))
            }
            (current, state) => {
                self.ignore("AUTH_STATE", current, &format!("{state:?}"));
                Step::default()
            }
        }
    }

    fn on_channel_opened(&mut self, channel: u32) -> Step {
        let requested = self
            .channels
            .get(&channel)
            .is_some_and(|c| c.status == ChannelStatus::Requested);

        if self.state != ProtocolState::ChannelRequested || !requested {
            self.ignore("CHANNEL_OPENED", self.state, &format!("channel {channel}"));
            return Step::default();
        }

        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.status = ChannelStatus::Open;
        }
        tracing::info!(connection_id = %self.connection_id, channel, "Feed channel opened");

        self.transition(ProtocolState::FeedConfiguring);
        Step::send(OutboundMessage::feed_setup(
            channel,
            self.config.aggregation_period,
            self.config.schema.to_accept_fields(),
        ))
    }

    fn on_feed_config(
        &mut self,
        channel: u32,
        event_fields: Option<&HashMap<String, Vec<String>>>,
    ) -> Step {
        let is_feed = channel == self.config.feed_channel && self.is_open(channel);
        let configurable = matches!(
            self.state,
            ProtocolState::FeedConfiguring | ProtocolState::Streaming
        );
        if !is_feed || !configurable {
            self.ignore("FEED_CONFIG", self.state, &format!("channel {channel}"));
            return Step::default();
        }

        if let Some(fields) = event_fields {
            self.schema.apply_config(fields);
            tracing::debug!(
                connection_id = %self.connection_id,
                event_types = fields.len(),
                "Applied server event fields"
            );
        }

        if self.state == ProtocolState::Streaming {
            return Step::default();
        }

        let entries = self.subscriptions.entries();
        tracing::info!(
            connection_id = %self.connection_id,
            channel,
            subscriptions = entries.len(),
            "Feed configured, subscribing"
        );
        self.transition(ProtocolState::Streaming);

        let mut step = Step::send(OutboundMessage::feed_subscription(
            channel,
            true,
            entries,
            Vec::new(),
        ));
        step.entered_streaming = true;
        step
    }

    fn on_feed_data(&self, channel: u32, data: &[serde_json::Value]) -> Step {
        if self.state != ProtocolState::Streaming
            || channel != self.config.feed_channel
            || !self.is_open(channel)
        {
            self.ignore("FEED_DATA", self.state, &format!("channel {channel}"));
            return Step::default();
        }

        let batch = compact::decode(&self.schema, data);
        Step {
            events: batch.events,
            decode_errors: batch.errors,
            skipped: batch.skipped,
            ..Step::default()
        }
    }

    fn on_channel_closed(&mut self, channel: u32) -> Result<Step, ProtocolError> {
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.status = ChannelStatus::Closed;
        }

        if channel == self.config.feed_channel && self.channels.contains_key(&channel) {
            tracing::error!(
                connection_id = %self.connection_id,
                channel,
                "Feed channel closed by server"
            );
            self.transition(ProtocolState::Error);
            return Err(ProtocolError::FeedChannelClosed(channel));
        }

        self.ignore("CHANNEL_CLOSED", self.state, &format!("channel {channel}"));
        Ok(Step::default())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn is_open(&self, channel: u32) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|c| c.status == ChannelStatus::Open)
    }

    fn transition(&mut self, next: ProtocolState) {
        tracing::debug!(
            connection_id = %self.connection_id,
            from = %self.state,
            to = %next,
            "Protocol transition"
        );
        self.state = next;
    }

    fn ignore(&self, message_type: &str, state: ProtocolState, detail: &str) {
        tracing::debug!(
            connection_id = %self.connection_id,
            message_type,
            state = %state,
            detail,
            "Ignoring unexpected message"
        );
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("state", &self.state)
            .field("quote_token", &"[REDACTED]")
            .field("authenticated", &self.authenticated)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
