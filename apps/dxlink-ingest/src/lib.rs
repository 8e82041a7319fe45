#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )
)]

//! DXLink Ingest - Market Data Ingestion and Indicator Engine
//!
//! Keeps one DXLink WebSocket session open against the market data gateway,
//! decodes compact feed events into OHLCV bars, and recomputes a suite of
//! technical indicators per symbol on a fixed cadence.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and computation
//!   - `market`: Feed events, bars, timeframes and symbol normalization
//!   - `window`: Bounded per-series bar windows
//!   - `indicators`: EMA, SMA, RSI, ATR, Bollinger, MACD, VWAP, RVOL
//!   - `subscription`: Subscription tracking and change sets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Token provider and persistence sink interfaces
//!   - `services`: Ingestion, indicator cycles, scheduling, feed state
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `dxlink`: Protocol state machine, transport, keepalive, client
//!   - `tastytrade`: REST quote-token provider
//!   - `persistence`: Persistence sink adapters
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! DXLink WS ──► Session ──► StreamEvent ──► IngestionService ──► WindowStore
//!                                                   │                 │
//!                                                   ▼                 ▼
//!                                            PersistenceSink ◄── IndicatorService
//!                                                                (every 10s)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::indicators::{IndicatorComputeError, IndicatorParams, IndicatorSnapshot};
pub use domain::market::{Bar, EventKind, MarketEvent, Timeframe};
pub use domain::subscription::{
    SubscriptionChanges, SubscriptionEntry, SubscriptionManager, SubscriptionStats, default_plan,
};
pub use domain::window::{SeriesKey, WindowStore};

// Ports
pub use application::ports::{AuthError, PersistenceSink, QuoteToken, SinkError, TokenProvider};

// Services
pub use application::services::{
    ConnectionState, CycleReport, FeedState, IndicatorService, IndicatorServiceConfig,
    IngestOutcome, IngestionService, PeriodicScheduler, resolve_streamer_symbols,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, DxLinkSettings, IndicatorSettings, IngestConfig, ServerSettings, SessionToken,
};

// DXLink client
pub use infrastructure::dxlink::{
    DxLinkClient, DxLinkClientConfig, DxLinkClientError, Session, SessionConfig, StreamEvent,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
