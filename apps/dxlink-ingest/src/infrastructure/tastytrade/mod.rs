//! Tastytrade REST Token Provider
//!
//! Implements [`TokenProvider`] over the brokerage REST API.
//!
//! # Endpoints
//!
//! - `GET /api-quote-tokens` - quote token and DXLink URL
//! - `GET /instruments/equities/{symbol}` - streamer symbol
//!
//! The raw session token is sent in the `Authorization` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{AuthError, QuoteToken, TokenProvider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct QuoteTokenData {
    token: Option<String>,
    #[serde(rename = "dxlink-url")]
    dxlink_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentData {
    #[serde(rename = "streamer-symbol")]
    streamer_symbol: Option<String>,
    #[serde(default)]
    items: Vec<InstrumentItem>,
}

#[derive(Debug, Deserialize)]
struct InstrumentItem {
    #[serde(rename = "streamer-symbol")]
    streamer_symbol: Option<String>,
}

// =============================================================================
// Provider
// =============================================================================

/// `TokenProvider` backed by the Tastytrade REST API.
#[derive(Debug, Clone)]
pub struct TastytradeTokenProvider {
    client: Client,
    base_url: String,
}

impl TastytradeTokenProvider {
    /// Create a provider for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, session_token: &str, path: &str) -> Result<T, AuthError> {
        if session_token.trim().is_empty() {
            return Err(AuthError::MissingSessionToken);
        }

        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", session_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%url, status = status.as_u16(), "Token provider request failed");
            return Err(categorize_status(status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl TokenProvider for TastytradeTokenProvider {
    async fn quote_token(&self, session_token: &str) -> Result<QuoteToken, AuthError> {
        let envelope: Envelope<QuoteTokenData> = self.get(session_token, "/api-quote-tokens").await?;
        let data = envelope
            .data
            .ok_or_else(|| AuthError::MalformedResponse("missing data".into()))?;

        let token = data
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing token".into()))?;
        let url = data
            .dxlink_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing dxlink-url".into()))?;

        Ok(QuoteToken::issued_now(token, url))
    }

    async fn streamer_symbol(&self, session_token: &str, symbol: &str) -> Result<String, AuthError> {
        let path = format!("/instruments/equities/{symbol}");
        let envelope: Envelope<InstrumentData> = self.get(session_token, &path).await?;
        let data = envelope
            .data
            .ok_or_else(|| AuthError::MalformedResponse("missing data".into()))?;

        data.streamer_symbol
            .or_else(|| data.items.into_iter().find_map(|item| item.streamer_symbol))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse(format!("no streamer-symbol for {symbol}")))
    }
}

/// Map a failed HTTP status to an `AuthError`.
fn categorize_status(status: StatusCode, body: String) -> AuthError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthError::Rejected {
            status: status.as_u16(),
            message: body,
        },
        s if s.is_server_error()
            || s == StatusCode::TOO_MANY_REQUESTS
            || s == StatusCode::REQUEST_TIMEOUT =>
        {
            AuthError::Unavailable(format!("HTTP {}", s.as_u16()))
        }
        s => AuthError::MalformedResponse(format!("HTTP {}: {body}", s.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn provider(server: &MockServer) -> TastytradeTokenProvider {
        TastytradeTokenProvider::new(server.uri()).unwrap()
    }

    #[tokio::test]
    async fn fetches_quote_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api-quote-tokens"))
            .and(header("Authorization", "session-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"token": "quote-abc", "dxlink-url": "wss://tasty.dxfeed.com/realtime", "level": "api"}
            })))
            .mount(&server)
            .await;

        let token = provider(&server).await.quote_token("session-123").await.unwrap();
        assert_eq!(token.token, "quote-abc");
        assert_eq!(token.websocket_url, "wss://tasty.dxfeed.com/realtime");
        assert!(token.is_valid_at(chrono::Utc::now(), Duration::from_secs(23 * 3_600)));
    }

    #[tokio::test]
    async fn unauthorized_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api-quote-tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid session"))
            .mount(&server)
            .await;

        let err = provider(&server).await.quote_token("bad").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 401,
                message: "invalid session".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api-quote-tokens"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).await.quote_token("s").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_url_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api-quote-tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "t"}})))
            .mount(&server)
            .await;

        let err = provider(&server).await.quote_token("s").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn empty_session_token_is_missing() {
        let server = MockServer::start().await;
        let err = provider(&server).await.quote_token("  ").await.unwrap_err();
        assert_eq!(err, AuthError::MissingSessionToken);
    }

    #[tokio::test]
    async fn streamer_symbol_direct_and_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instruments/equities/SPY"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"streamer-symbol": "SPY"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/instruments/equities/BRK.B"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"items": [{"symbol": "BRK/B", "streamer-symbol": "BRK/B"}]}
            })))
            .mount(&server)
            .await;

        let provider = provider(&server).await;
        assert_eq!(provider.streamer_symbol("s", "SPY").await.unwrap(), "SPY");
        assert_eq!(provider.streamer_symbol("s", "BRK.B").await.unwrap(), "BRK/B");
    }

    #[test]
    fn status_categories() {
        assert!(matches!(
            categorize_status(StatusCode::FORBIDDEN, String::new()),
            AuthError::Rejected { status: 403, .. }
        ));
        assert!(categorize_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(matches!(
            categorize_status(StatusCode::NOT_FOUND, String::new()),
            AuthError::MalformedResponse(_)
        ));
    }
}
