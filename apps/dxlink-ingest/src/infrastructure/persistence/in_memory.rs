//! In-memory persistence sink.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{PersistenceSink, SinkError};
use crate::domain::indicators::IndicatorSnapshot;
use crate::domain::market::{Bar, Timeframe};

type SeriesBars = BTreeMap<DateTime<Utc>, Bar>;

/// In-memory implementation of `PersistenceSink`.
///
/// Upserts are keyed like a database table would key them, so replays and
/// retries are idempotent. Suitable for development and tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    bars: RwLock<HashMap<(String, Timeframe), SeriesBars>>,
    snapshots: RwLock<HashMap<String, IndicatorSnapshot>>,
}

impl InMemorySink {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bars stored for a series.
    #[must_use]
    pub fn bar_count(&self, symbol: &str, timeframe: &Timeframe) -> usize {
        self.bars
            .read()
            .get(&(symbol.to_string(), timeframe.clone()))
            .map_or(0, BTreeMap::len)
    }

    /// Latest snapshot for a symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<IndicatorSnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Number of symbols with a snapshot.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn upsert_bar(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        bar: &Bar,
    ) -> Result<(), SinkError> {
        self.bars
            .write()
            .entry((symbol.to_string(), timeframe.clone()))
            .or_default()
            .insert(bar.timestamp, bar.clone());
        Ok(())
    }

    async fn upsert_indicator_snapshot(
        &self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
    ) -> Result<(), SinkError> {
        self.snapshots
            .write()
            .insert(symbol.to_string(), snapshot.clone());
        Ok(())
    }

    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        timeframe: &Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, SinkError> {
        let bars = self.bars.read();
        let Some(series) = bars.get(&(symbol.to_string(), timeframe.clone())) else {
            return Ok(Vec::new());
        };

        let mut recent: Vec<Bar> = series.values().rev().take(limit).cloned().collect();
        recent.reverse();
        Ok(recent)
    }

    async fn fetch_active_symbols(
        &self,
        timeframe: &Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, SinkError> {
        let bars = self.bars.read();
        let mut symbols: Vec<String> = bars
            .iter()
            .filter(|((_, tf), series)| {
                tf == timeframe && series.keys().next_back().is_some_and(|ts| *ts >= since)
            })
            .map(|((symbol, _), _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}
