//! Persistence Sink Port (Driven Port)
//!
//! Durable storage for raw bars and indicator snapshots. Every write is an
//! idempotent upsert so retries and duplicate deliveries after a reconnect
//! are safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::indicators::IndicatorSnapshot;
use crate::domain::market::{Bar, Timeframe};

/// Persistence sink errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Backend could not be reached.
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the write or query.
    #[error("persistence operation failed: {0}")]
    Operation(String),
}

/// Port for storing bars and snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Upsert a bar keyed by (symbol, timeframe, timestamp).
    async fn upsert_bar(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        bar: &Bar,
    ) -> Result<(), SinkError>;

    /// Upsert the latest snapshot for a symbol, replacing any prior one.
    async fn upsert_indicator_snapshot(
        &self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
    ) -> Result<(), SinkError>;

    /// Most recent `limit` bars for a series, oldest first.
    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, SinkError>;

    /// Symbols with at least one bar in `timeframe` at or after `since`, sorted.
    async fn fetch_active_symbols(
        &self,
        timeframe: &Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, SinkError>;
}
