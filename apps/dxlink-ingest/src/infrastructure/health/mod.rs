//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready while streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConnectionState, CycleReport, FeedState};
use crate::domain::subscription::{SubscriptionManager, SubscriptionStats};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Streaming feed status.
    pub feed: FeedInfo,
    /// Subscription counts.
    pub subscriptions: SubscriptionStats,
    /// Last indicator cycle, if any ran.
    pub last_cycle: Option<CycleReport>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Disconnected or halted.
    Unhealthy,
}

/// Streaming feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is streaming.
    pub streaming: bool,
    /// Last time the feed entered streaming.
    pub last_streaming_at: Option<DateTime<Utc>>,
    /// Events received.
    pub messages_received: u64,
    /// Bars persisted.
    pub bars_ingested: u64,
    /// Current reconnect attempt (0 while streaming).
    pub reconnect_attempts: u32,
    /// Fatal error, if halted.
    pub error: Option<String>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_state: Arc<FeedState>,
    subscriptions: Arc<SubscriptionManager>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed_state: Arc<FeedState>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_state,
            subscriptions,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed_state.is_streaming() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = &state.feed_state;
    let connection_state = feed.get_state();

    HealthResponse {
        status: determine_health_status(connection_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedInfo {
            state: connection_state,
            streaming: connection_state == ConnectionState::Streaming,
            last_streaming_at: feed.last_streaming_at(),
            messages_received: feed.get_messages_received(),
            bars_ingested: feed.get_bars_ingested(),
            reconnect_attempts: feed.get_reconnect_attempts(),
            error: feed.error_message(),
        },
        subscriptions: state.subscriptions.stats(),
        last_cycle: feed.last_cycle(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Streaming => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Error => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use test_case::test_case;

    use super::*;
    use crate::domain::market::EventKind;
    use crate::domain::subscription::SubscriptionEntry;

    fn state() -> Arc<HealthServerState> {
        let subscriptions = Arc::new(SubscriptionManager::with_entries([
            SubscriptionEntry::new(EventKind::Quote, "SPY"),
            SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}"),
        ]));
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            Arc::new(FeedState::new()),
            subscriptions,
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionState::Streaming, HealthStatus::Healthy)]
    #[test_case(ConnectionState::Connecting, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Reconnecting, HealthStatus::Degraded)]
    #[test_case(ConnectionState::Disconnected, HealthStatus::Unhealthy)]
    #[test_case(ConnectionState::Error, HealthStatus::Unhealthy)]
    fn status_follows_connection(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(determine_health_status(state), expected);
    }

    #[test]
    fn response_reports_feed_and_subscriptions() {
        let state = state();
        state.feed_state.set_state(ConnectionState::Streaming);
        state.feed_state.increment_messages();

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(response.feed.streaming);
        assert_eq!(response.feed.messages_received, 1);
        assert_eq!(response.subscriptions.quotes, 1);
        assert_eq!(response.subscriptions.candles, 1);
        assert!(response.last_cycle.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["feed"]["state"], "streaming");
    }

    #[tokio::test]
    async fn readiness_tracks_streaming() {
        let state = state();
        let response = readiness_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.feed_state.set_state(ConnectionState::Streaming);
        let response = readiness_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let server = HealthServer::new(0, state(), cancel.clone());
        let handle = tokio::spawn(server.serve(listener));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
