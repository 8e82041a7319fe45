//! Indicator Service
//!
//! One compute cycle: for every tracked symbol, load the bounded bar window,
//! recompute all indicators from scratch and upsert exactly one snapshot.
//!
//! # Window source
//!
//! The in-memory window is used when it already holds `window_size` bars.
//! Otherwise the sink is asked for the most recent bars, since it also holds
//! history written before this process started. If that fetch fails, a
//! non-empty in-memory window is used instead.
//!
//! # Failure isolation
//!
//! Errors are scoped to one symbol in one cycle. They are logged, counted in
//! the [`CycleReport`], and never stop the remaining symbols.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::{PersistenceSink, SinkError};
use crate::domain::indicators::{IndicatorComputeError, IndicatorParams, IndicatorSnapshot, compute_snapshot};
use crate::domain::market::{Bar, Timeframe};
use crate::domain::window::{SeriesKey, WindowStore};
use crate::infrastructure::metrics::{self, SnapshotOutcome};

use super::feed_state::FeedState;

/// Errors computing one symbol's snapshot.
#[derive(Debug, thiserror::Error)]
pub enum IndicatorServiceError {
    /// Bars could not be loaded.
    #[error("failed to load bars: {0}")]
    Fetch(#[from] SinkError),

    /// Indicators could not be computed.
    #[error(transparent)]
    Compute(#[from] IndicatorComputeError),
}

/// Configuration for the indicator service.
#[derive(Debug, Clone)]
pub struct IndicatorServiceConfig {
    /// Timeframe of the bars used.
    pub timeframe: Timeframe,
    /// Bars used per symbol.
    pub window_size: usize,
    /// Symbols to compute. Empty means discover from the sink.
    pub symbols: Vec<String>,
    /// Indicator periods.
    pub params: IndicatorParams,
    /// How far back discovery looks for active symbols.
    pub discovery_lookback: Duration,
}

impl Default for IndicatorServiceConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::default(),
            window_size: 300,
            symbols: Vec::new(),
            params: IndicatorParams::default(),
            discovery_lookback: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Summary of one compute cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// Symbols considered.
    pub symbols: usize,
    /// Snapshots written.
    pub written: usize,
    /// Symbols skipped (no data or compute error).
    pub skipped: usize,
    /// Snapshots computed but not persisted.
    pub failed: usize,
    /// Cycle duration in milliseconds.
    pub duration_ms: u64,
}

/// Periodic indicator computation.
pub struct IndicatorService {
    config: IndicatorServiceConfig,
    sink: Arc<dyn PersistenceSink>,
    windows: Arc<WindowStore>,
    feed_state: Arc<FeedState>,
}

impl IndicatorService {
    /// Create a new indicator service.
    #[must_use]
    pub fn new(
        config: IndicatorServiceConfig,
        sink: Arc<dyn PersistenceSink>,
        windows: Arc<WindowStore>,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            config,
            sink,
            windows,
            feed_state,
        }
    }

    /// Run one compute cycle over all tracked symbols.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let symbols = self.tracked_symbols().await;

        let mut report = CycleReport {
            started_at,
            symbols: symbols.len(),
            written: 0,
            skipped: 0,
            failed: 0,
            duration_ms: 0,
        };

        for symbol in &symbols {
            let snapshot = match self.compute(symbol).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Skipping indicator snapshot");
                    metrics::record_snapshot(SnapshotOutcome::Skipped);
                    report.skipped += 1;
                    continue;
                }
            };

            match self.sink.upsert_indicator_snapshot(symbol, &snapshot).await {
                Ok(()) => {
                    tracing::debug!(
                        symbol = %symbol,
                        timestamp = %snapshot.timestamp,
                        bars = snapshot.bar_count,
                        "Indicator snapshot written"
                    );
                    metrics::record_snapshot(SnapshotOutcome::Written);
                    report.written += 1;
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Failed to upsert indicator snapshot");
                    metrics::record_sink_error("upsert_indicator_snapshot");
                    metrics::record_snapshot(SnapshotOutcome::Failed);
                    report.failed += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::record_cycle_duration(elapsed);
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        tracing::info!(
            symbols = report.symbols,
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "Indicator cycle complete"
        );
        self.feed_state.record_cycle(report.clone());
        report
    }

    /// Compute the snapshot for one symbol.
    ///
    /// # Errors
    ///
    /// Returns `IndicatorServiceError` if bars cannot be loaded or the
    /// indicators cannot be computed.
    pub async fn compute(&self, symbol: &str) -> Result<IndicatorSnapshot, IndicatorServiceError> {
        let bars = self.load_window(symbol).await?;
        Ok(compute_snapshot(symbol, &bars, &self.config.params)?)
    }

    async fn load_window(&self, symbol: &str) -> Result<Vec<Bar>, IndicatorServiceError> {
        let key = SeriesKey::new(symbol, self.config.timeframe.clone());
        let mut cached = self.windows.snapshot(&key);
        let size = self.config.window_size;

        if cached.len() >= size {
            cached.drain(..cached.len() - size);
            return Ok(cached);
        }

        match self
            .sink
            .fetch_recent_bars(symbol, &self.config.timeframe, size)
            .await
        {
            Ok(bars) => Ok(bars),
            Err(e) if !cached.is_empty() => {
                tracing::warn!(
                    symbol = %symbol,
                    error = %e,
                    bars = cached.len(),
                    "Bar fetch failed, using in-memory window"
                );
                metrics::record_sink_error("fetch_recent_bars");
                Ok(cached)
            }
            Err(e) => {
                metrics::record_sink_error("fetch_recent_bars");
                Err(e.into())
            }
        }
    }

    async fn tracked_symbols(&self) -> Vec<String> {
        if !self.config.symbols.is_empty() {
            return self.config.symbols.clone();
        }

        let lookback = chrono::Duration::from_std(self.config.discovery_lookback)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let since = Utc::now() - lookback;

        match self
            .sink
            .fetch_active_symbols(&self.config.timeframe, since)
            .await
        {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::warn!(error = %e, "Symbol discovery failed, falling back to in-memory windows");
                metrics::record_sink_error("fetch_active_symbols");
                self.windows.symbols(&self.config.timeframe)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::application::ports::MockPersistenceSink;

    fn bars(symbol: &str, count: usize) -> Vec<Bar> {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = 100.0 + i as f64 * 0.5;
                Bar {
                    symbol: symbol.to_string(),
                    timeframe: Timeframe::one_minute(),
                    timestamp: start + chrono::Duration::minutes(i as i64),
                    open: close - 0.2,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + i as f64,
                    day_volume: None,
                }
            })
            .collect()
    }

    fn config(symbols: &[&str]) -> IndicatorServiceConfig {
        IndicatorServiceConfig {
            symbols: symbols.iter().map(ToString::to_string).collect(),
            window_size: 50,
            ..IndicatorServiceConfig::default()
        }
    }

    fn service(config: IndicatorServiceConfig, sink: MockPersistenceSink) -> IndicatorService {
        IndicatorService::new(
            config,
            Arc::new(sink),
            Arc::new(WindowStore::new(300)),
            Arc::new(FeedState::new()),
        )
    }

    #[tokio::test]
    async fn failing_symbol_does_not_block_others() {
        let mut sink = MockPersistenceSink::new();
        sink.expect_fetch_recent_bars()
            .with(eq("BAD"), always(), eq(50))
            .returning(|_, _, _| Err(SinkError::Unavailable("timeout".into())));
        sink.expect_fetch_recent_bars()
            .with(eq("SPY"), always(), eq(50))
            .returning(|_, _, _| Ok(bars("SPY", 50)));
        sink.expect_fetch_recent_bars()
            .with(eq("EMPTY"), always(), eq(50))
            .returning(|_, _, _| Ok(Vec::new()));
        sink.expect_upsert_indicator_snapshot()
            .with(eq("SPY"), always())
            .times(1)
            .returning(|_, _| Ok(()));

        let report = service(config(&["BAD", "SPY", "EMPTY"]), sink).run_cycle().await;
        assert_eq!(report.symbols, 3);
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn snapshot_upsert_failure_is_counted() {
        let mut sink = MockPersistenceSink::new();
        sink.expect_fetch_recent_bars()
            .returning(|symbol, _, limit| Ok(bars(symbol, limit)));
        sink.expect_upsert_indicator_snapshot()
            .returning(|_, _| Err(SinkError::Operation("constraint".into())));

        let report = service(config(&["SPY"]), sink).run_cycle().await;
        assert_eq!(report.written, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn full_window_skips_sink_fetch() {
        let mut sink = MockPersistenceSink::new();
        sink.expect_fetch_recent_bars().never();
        sink.expect_upsert_indicator_snapshot()
            .times(1)
            .returning(|_, _| Ok(()));

        let windows = Arc::new(WindowStore::new(300));
        let source = bars("SPY", 80);
        for bar in &source {
            windows.upsert(bar.clone());
        }
        let service = IndicatorService::new(
            config(&["SPY"]),
            Arc::new(sink),
            windows,
            Arc::new(FeedState::new()),
        );

        let snapshot = service.compute("SPY").await.unwrap();
        assert_eq!(snapshot.bar_count, 50);
        assert_eq!(snapshot.timestamp, source[79].timestamp);
        assert_eq!(service.run_cycle().await.written, 1);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_partial_window() {
        let mut sink = MockPersistenceSink::new();
        sink.expect_fetch_recent_bars()
            .returning(|_, _, _| Err(SinkError::Unavailable("down".into())));

        let windows = Arc::new(WindowStore::new(300));
        for bar in bars("SPY", 5) {
            windows.upsert(bar);
        }
        let service = IndicatorService::new(
            config(&["SPY"]),
            Arc::new(sink),
            windows,
            Arc::new(FeedState::new()),
        );

        assert_eq!(service.compute("SPY").await.unwrap().bar_count, 5);
    }

    #[tokio::test]
    async fn discovers_symbols_when_unconfigured() {
        let mut sink = MockPersistenceSink::new();
        sink.expect_fetch_active_symbols()
            .times(1)
            .returning(|_, _| Ok(vec!["IWM".to_string()]));
        sink.expect_fetch_recent_bars()
            .with(eq("IWM"), always(), always())
            .returning(|symbol, _, limit| Ok(bars(symbol, limit)));
        sink.expect_upsert_indicator_snapshot()
            .with(eq("IWM"), always())
            .times(1)
            .returning(|_, _| Ok(()));

        let feed_state = Arc::new(FeedState::new());
        let service = IndicatorService::new(
            config(&[]),
            Arc::new(sink),
            Arc::new(WindowStore::new(300)),
            Arc::clone(&feed_state),
        );

        let report = service.run_cycle().await;
        assert_eq!(report.written, 1);
        assert_eq!(feed_state.last_cycle(), Some(report));
    }
}
