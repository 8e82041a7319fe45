//! DXLink Streaming Adapters
//!
//! Implements the DXLink WebSocket protocol used by the market data gateway:
//!
//! - **Messages/Codec**: Tagged JSON frames
//! - **Compact**: Positional `FEED_DATA` decoding against a negotiated schema
//! - **Protocol**: Handshake and channel state machine, one per session
//! - **Client**: Session lifecycle, keepalive and reconnection

pub mod client;
pub mod codec;
pub mod compact;
pub mod keepalive;
pub mod messages;
pub mod protocol;
pub mod reconnect;
pub mod transport;

pub use client::{DxLinkClient, DxLinkClientConfig, DxLinkClientError, StreamEvent};
pub use codec::{CodecError, DxLinkCodec};
pub use compact::{DecodeError, DecodedBatch, EventSchema};
pub use keepalive::{ActivityTracker, KeepaliveConfig, KeepaliveFailure, KeepaliveHandle};
pub use messages::{AuthStateKind, InboundMessage, OutboundMessage};
pub use protocol::{
    Channel, ChannelStatus, ProtocolError, ProtocolState, Session, SessionConfig, Step,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::{Connector, Transport, TransportError, WsConnector, WsTransport};
