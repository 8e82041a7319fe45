//! Token Provider Port (Driven Port)
//!
//! Exchanges a brokerage session token for a streaming quote token and the
//! WebSocket URL to connect to, and resolves plain symbols to the symbols
//! the streaming gateway expects.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// How long a quote token stays valid after issue.
pub const QUOTE_TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Streaming credentials returned by the token provider.
#[derive(Clone, PartialEq, Eq)]
pub struct QuoteToken {
    /// Token sent in `AUTH`.
    pub token: String,
    /// WebSocket URL of the streaming gateway.
    pub websocket_url: String,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl QuoteToken {
    /// Create a token issued now with the standard validity.
    #[must_use]
    pub fn issued_now(token: impl Into<String>, websocket_url: impl Into<String>) -> Self {
        let validity =
            chrono::Duration::from_std(QUOTE_TOKEN_VALIDITY).unwrap_or(chrono::Duration::MAX);
        Self {
            token: token.into(),
            websocket_url: websocket_url.into(),
            expires_at: Utc::now() + validity,
        }
    }

    /// Check whether the token is still usable at `now` with `margin` to spare.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

impl std::fmt::Debug for QuoteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteToken")
            .field("token", &"[REDACTED]")
            .field("websocket_url", &self.websocket_url)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token exchange and symbol lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No session token was configured.
    #[error("session token is missing")]
    MissingSessionToken,

    /// The provider refused the session token.
    #[error("session token rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The provider could not be reached or failed server-side.
    #[error("token provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered without the expected fields.
    #[error("malformed token provider response: {0}")]
    MalformedResponse(String),
}

impl AuthError {
    /// Check if retrying later might succeed without operator intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Port for obtaining streaming credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Exchange a session token for a quote token and WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Rejected` if the session token is refused and
    /// `AuthError::Unavailable` on transient failures.
    async fn quote_token(&self, session_token: &str) -> Result<QuoteToken, AuthError>;

    /// Resolve a plain symbol to its streamer symbol.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the lookup fails.
    async fn streamer_symbol(&self, session_token: &str, symbol: &str)
    -> Result<String, AuthError>;
}
