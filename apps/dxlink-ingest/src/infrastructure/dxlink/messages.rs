//! DXLink Message Types
//!
//! Closed tagged unions for every JSON frame exchanged with the gateway.
//! Field names are bit-exact with the wire format.
//!
//! # Control channel
//!
//! `SETUP`, `AUTH_STATE`, `AUTH`, `KEEPALIVE` and `ERROR` travel on
//! channel 0. Feed traffic uses the channel id the client requested.
//!
//! # Reference
//!
//! ```json
//! {"type":"SETUP","channel":0,"version":"0.1-dxlink-ingest/0.1.0","keepaliveTimeout":60,"acceptKeepaliveTimeout":60}
//! {"type":"AUTH_STATE","channel":0,"state":"UNAUTHORIZED"}
//! {"type":"FEED_DATA","channel":3,"data":["Quote",["Quote","SPY",100.5,100.7,"NaN",50]]}
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::subscription::SubscriptionEntry;

/// Channel carrying connection-level control messages.
pub const CONTROL_CHANNEL: u32 = 0;

/// Service name requested for market data channels.
pub const FEED_SERVICE: &str = "FEED";

/// Data format requested in `FEED_SETUP`.
pub const COMPACT_FORMAT: &str = "COMPACT";

/// Protocol version announced in `SETUP`.
pub const CLIENT_VERSION: &str = concat!(
    "0.1-",
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

// =============================================================================
// Inbound Messages
// =============================================================================

/// Authorization state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStateKind {
    /// Server is waiting for `AUTH`.
    Unauthorized,
    /// Session is authorized.
    Authorized,
}

/// Message received from the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Server half of the `SETUP` exchange.
    Setup {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
        /// Server protocol version.
        #[serde(default)]
        version: Option<String>,
        /// Server keepalive timeout in seconds.
        #[serde(rename = "keepaliveTimeout", default)]
        keepalive_timeout: Option<u64>,
        /// Keepalive timeout the server accepts from the client, in seconds.
        #[serde(rename = "acceptKeepaliveTimeout", default)]
        accept_keepalive_timeout: Option<u64>,
    },

    /// Authorization state change.
    AuthState {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
        /// New state.
        state: AuthStateKind,
        /// Authorized user, when reported.
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },

    /// A requested channel is open.
    ChannelOpened {
        /// Channel id.
        channel: u32,
        /// Service name, when echoed.
        #[serde(default)]
        service: Option<String>,
    },

    /// A channel was closed by the server.
    ChannelClosed {
        /// Channel id.
        channel: u32,
    },

    /// Feed configuration accepted by the server.
    FeedConfig {
        /// Channel id.
        channel: u32,
        /// Aggregation period in seconds.
        #[serde(rename = "aggregationPeriod", default)]
        aggregation_period: Option<f64>,
        /// Data format the server will use.
        #[serde(rename = "dataFormat", default)]
        data_format: Option<String>,
        /// Field order per event type, when the server overrides it.
        #[serde(rename = "eventFields", default)]
        event_fields: Option<HashMap<String, Vec<String>>>,
    },

    /// Compact event data.
    FeedData {
        /// Channel id.
        channel: u32,
        /// Alternating `[eventType, fieldArray, ...]`.
        data: Vec<serde_json::Value>,
    },

    /// Liveness message.
    Keepalive {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
    },

    /// Server-reported error. Fatal for the session.
    Error {
        /// Channel the error relates to.
        #[serde(default)]
        channel: u32,
        /// Error code, e.g. `UNAUTHORIZED`.
        #[serde(default)]
        error: Option<String>,
        /// Human-readable detail.
        #[serde(default)]
        message: Option<String>,
    },

    /// Any message type this client does not handle.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::AuthState { .. } => "AUTH_STATE",
            Self::ChannelOpened { .. } => "CHANNEL_OPENED",
            Self::ChannelClosed { .. } => "CHANNEL_CLOSED",
            Self::FeedConfig { .. } => "FEED_CONFIG",
            Self::FeedData { .. } => "FEED_DATA",
            Self::Keepalive { .. } => "KEEPALIVE",
            Self::Error { .. } => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Parameters of a `CHANNEL_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Channel contract, `AUTO` for feeds.
    pub contract: String,
}

/// Message sent to the gateway.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// Opens the connection.
    Setup {
        /// Channel (always 0).
        channel: u32,
        /// Client protocol version.
        version: String,
        /// Client keepalive timeout in seconds.
        #[serde(rename = "keepaliveTimeout")]
        keepalive_timeout: u64,
        /// Keepalive timeout the client accepts from the server, in seconds.
        #[serde(rename = "acceptKeepaliveTimeout")]
        accept_keepalive_timeout: u64,
    },

    /// Authorizes the connection with a quote token.
    Auth {
        /// Channel (always 0).
        channel: u32,
        /// Quote token.
        token: String,
    },

    /// Requests a service channel.
    ChannelRequest {
        /// Client-chosen channel id.
        channel: u32,
        /// Service name.
        service: String,
        /// Channel parameters.
        parameters: ChannelParameters,
    },

    /// Configures a feed channel.
    FeedSetup {
        /// Feed channel id.
        channel: u32,
        /// Aggregation period in seconds.
        #[serde(rename = "acceptAggregationPeriod")]
        accept_aggregation_period: f64,
        /// Data format.
        #[serde(rename = "acceptDataFormat")]
        accept_data_format: String,
        /// Requested field order per event type.
        #[serde(rename = "acceptEventFields")]
        accept_event_fields: BTreeMap<String, Vec<String>>,
    },

    /// Adds or removes subscriptions.
    FeedSubscription {
        /// Feed channel id.
        channel: u32,
        /// Drop every existing subscription first.
        reset: bool,
        /// Entries to add.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        add: Vec<SubscriptionEntry>,
        /// Entries to remove.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        remove: Vec<SubscriptionEntry>,
    },

    /// Liveness message.
    Keepalive {
        /// Channel (always 0).
        channel: u32,
    },
}

impl OutboundMessage {
    /// `SETUP` with symmetric keepalive timeouts.
    #[must_use]
    pub fn setup(keepalive_timeout_secs: u64) -> Self {
        Self::Setup {
            channel: CONTROL_CHANNEL,
            version: CLIENT_VERSION.to_string(),
            keepalive_timeout: keepalive_timeout_secs,
            accept_keepalive_timeout: keepalive_timeout_secs,
        }
    }

    /// `AUTH` carrying the quote token.
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            channel: CONTROL_CHANNEL,
            token: token.into(),
        }
    }

    /// `CHANNEL_REQUEST` for a feed channel.
    #[must_use]
    pub fn feed_channel_request(channel: u32) -> Self {
        Self::ChannelRequest {
            channel,
            service: FEED_SERVICE.to_string(),
            parameters: ChannelParameters {
                contract: "AUTO".to_string(),
            },
        }
    }

    /// `FEED_SETUP` requesting compact data with the given field order.
    #[must_use]
    pub fn feed_setup(
        channel: u32,
        aggregation_period: f64,
        event_fields: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self::FeedSetup {
            channel,
            accept_aggregation_period: aggregation_period,
            accept_data_format: COMPACT_FORMAT.to_string(),
            accept_event_fields: event_fields,
        }
    }

    /// `FEED_SUBSCRIPTION`.
    #[must_use]
    pub const fn feed_subscription(
        channel: u32,
        reset: bool,
        add: Vec<SubscriptionEntry>,
        remove: Vec<SubscriptionEntry>,
    ) -> Self {
        Self::FeedSubscription {
            channel,
            reset,
            add,
            remove,
        }
    }

    /// `KEEPALIVE` on the control channel.
    #[must_use]
    pub const fn keepalive() -> Self {
        Self::Keepalive {
            channel: CONTROL_CHANNEL,
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::Auth { .. } => "AUTH",
            Self::ChannelRequest { .. } => "CHANNEL_REQUEST",
            Self::FeedSetup { .. } => "FEED_SETUP",
            Self::FeedSubscription { .. } => "FEED_SUBSCRIPTION",
            Self::Keepalive { .. } => "KEEPALIVE",
        }
    }

    /// Channel the message is sent on.
    #[must_use]
    pub const fn channel(&self) -> u32 {
        match self {
            Self::Setup { channel, .. }
            | Self::Auth { channel, .. }
            | Self::ChannelRequest { channel, .. }
            | Self::FeedSetup { channel, .. }
            | Self::FeedSubscription { channel, .. }
            | Self::Keepalive { channel } => *channel,
        }
    }
}

impl std::fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { channel, .. } => f
                .debug_struct("Auth")
                .field("channel", channel)
                .field("token", &"[REDACTED]")
                .finish(),
            Self::Setup {
                channel,
                version,
                keepalive_timeout,
                accept_keepalive_timeout,
            } => f
                .debug_struct("Setup")
                .field("channel", channel)
                .field("version", version)
                .field("keepalive_timeout", keepalive_timeout)
                .field("accept_keepalive_timeout", accept_keepalive_timeout)
                .finish(),
            Self::ChannelRequest {
                channel,
                service,
                parameters,
            } => f
                .debug_struct("ChannelRequest")
                .field("channel", channel)
                .field("service", service)
                .field("parameters", parameters)
                .finish(),
            Self::FeedSetup {
                channel,
                accept_aggregation_period,
                accept_data_format,
                accept_event_fields,
            } => f
                .debug_struct("FeedSetup")
                .field("channel", channel)
                .field("accept_aggregation_period", accept_aggregation_period)
                .field("accept_data_format", accept_data_format)
                .field("accept_event_fields", accept_event_fields)
                .finish(),
            Self::FeedSubscription {
                channel,
                reset,
                add,
                remove,
            } => f
                .debug_struct("FeedSubscription")
                .field("channel", channel)
                .field("reset", reset)
                .field("add", add)
                .field("remove", remove)
                .finish(),
            Self::Keepalive { channel } => {
                f.debug_struct("Keepalive").field("channel", channel).finish()
            }
        }
    }
}
