//! Feed State
//!
//! Shared view of the streaming session and the indicator loop, updated by
//! the event pump and read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::indicator_service::CycleReport;

/// Connection state of the streaming feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Socket open, handshake in progress.
    Connecting,
    /// Subscribed and receiving data.
    Streaming,
    /// Waiting to reconnect.
    Reconnecting,
    /// Halted with a fatal error.
    Error,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Tracks connection state and counters for the feed.
#[derive(Debug)]
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_streaming_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    last_cycle: RwLock<Option<CycleReport>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
    bars_ingested: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Create a disconnected feed state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_streaming_at: RwLock::new(None),
            error_message: RwLock::new(None),
            last_cycle: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            bars_ingested: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Streaming {
            *self.last_streaming_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Record the current reconnect attempt.
    pub fn set_reconnect_attempt(&self, attempt: u32) {
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment bars ingested counter.
    pub fn increment_bars(&self) {
        self.bars_ingested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of an indicator cycle.
    pub fn record_cycle(&self, report: CycleReport) {
        *self.last_cycle.write() = Some(report);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if the feed is streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.get_state() == ConnectionState::Streaming
    }

    /// Last time the feed entered streaming.
    #[must_use]
    pub fn last_streaming_at(&self) -> Option<DateTime<Utc>> {
        *self.last_streaming_at.read()
    }

    /// Last fatal error message.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Last indicator cycle report.
    #[must_use]
    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().clone()
    }

    /// Get messages received count.
    #[must_use]
    pub fn get_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get bars ingested count.
    #[must_use]
    pub fn get_bars_ingested(&self) -> u64 {
        self.bars_ingested.load(Ordering::Relaxed)
    }

    /// Get reconnect attempts count.
    #[must_use]
    pub fn get_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_error("boom".into());
        state.set_reconnect_attempt(4);
        assert_eq!(state.get_state(), ConnectionState::Error);
        assert_eq!(state.error_message().as_deref(), Some("boom"));

        state.set_state(ConnectionState::Streaming);
        assert!(state.is_streaming());
        assert!(state.error_message().is_none());
        assert_eq!(state.get_reconnect_attempts(), 0);
        assert!(state.last_streaming_at().is_some());
    }

    #[test]
    fn counters_increment() {
        let state = FeedState::default();
        state.increment_messages();
        state.increment_messages();
        state.increment_bars();
        assert_eq!(state.get_messages_received(), 2);
        assert_eq!(state.get_bars_ingested(), 1);
    }

    #[test]
    fn connection_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(ConnectionState::Streaming.as_str(), "streaming");
    }
}
