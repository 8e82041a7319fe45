//! Time Series Windows
//!
//! Bounded, timestamp-ordered OHLCV buffers keyed by (symbol, timeframe).
//!
//! # Design
//!
//! - Timestamps are strictly increasing within a window.
//! - Upserting a bar with an existing timestamp replaces it (late
//!   corrections).
//! - When the bound is exceeded, the oldest bar is evicted.
//! - A bar older than the oldest retained bar of a full window is dropped.
//!
//! The `WindowStore` has a single writer (ingestion) and any number of
//! readers (the indicator cycle). Readers get cloned snapshots taken under a
//! read lock, so a partially applied upsert is never visible.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::market::{Bar, Timeframe};

/// Default number of bars retained per series.
pub const DEFAULT_WINDOW_CAPACITY: usize = 300;

// =============================================================================
// Series Key
// =============================================================================

/// Key identifying one bar series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    /// Base symbol.
    pub symbol: String,
    /// Aggregation period.
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// Create a new series key.
    #[must_use]
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Key for the series a bar belongs to.
    #[must_use]
    pub fn of(bar: &Bar) -> Self {
        Self::new(bar.symbol.clone(), bar.timeframe.clone())
    }
}

// =============================================================================
// Time Series Window
// =============================================================================

/// Result of upserting a bar into a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUpdate {
    /// Bar was newer than every retained bar and was appended.
    Appended,
    /// Bar replaced a retained bar with the same timestamp.
    Replaced,
    /// Bar was older than the newest bar and inserted in order.
    Inserted,
    /// Bar was older than everything a full window retains and was dropped.
    Dropped,
}

/// Bounded ordered OHLCV buffer for one (symbol, timeframe).
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl TimeSeriesWindow {
    /// Create an empty window retaining at most `capacity` bars (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of retained bars.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Check if the window holds no bars.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Most recent bar.
    #[must_use]
    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Iterate bars oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Copy of the retained bars, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }

    /// Insert or replace a bar, keeping timestamps strictly increasing.
    pub fn upsert(&mut self, bar: Bar) -> WindowUpdate {
        let newest = self.bars.back().map(|last| last.timestamp);
        match newest {
            None => {
                self.bars.push_back(bar);
                return WindowUpdate::Appended;
            }
            Some(newest) if bar.timestamp > newest => {
                self.bars.push_back(bar);
                self.evict_overflow();
                return WindowUpdate::Appended;
            }
            Some(_) => {}
        }

        match self
            .bars
            .binary_search_by(|existing| existing.timestamp.cmp(&bar.timestamp))
        {
            Ok(index) => {
                self.bars[index] = bar;
                WindowUpdate::Replaced
            }
            Err(0) if self.bars.len() >= self.capacity => WindowUpdate::Dropped,
            Err(index) => {
                self.bars.insert(index, bar);
                self.evict_overflow();
                WindowUpdate::Inserted
            }
        }
    }

    fn evict_overflow(&mut self) {
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
    }
}

// =============================================================================
// Window Store
// =============================================================================

/// Windows for every tracked series.
#[derive(Debug)]
pub struct WindowStore {
    capacity: usize,
    windows: RwLock<HashMap<SeriesKey, TimeSeriesWindow>>,
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl WindowStore {
    /// Create a store whose windows retain `capacity` bars each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a bar into its series window, creating the window on first use.
    pub fn upsert(&self, bar: Bar) -> WindowUpdate {
        let key = SeriesKey::of(&bar);
        let mut windows = self.windows.write();
        windows
            .entry(key)
            .or_insert_with(|| TimeSeriesWindow::new(self.capacity))
            .upsert(bar)
    }

    /// Consistent copy of a series, oldest first. Empty if untracked.
    #[must_use]
    pub fn snapshot(&self, key: &SeriesKey) -> Vec<Bar> {
        self.windows
            .read()
            .get(key)
            .map(TimeSeriesWindow::to_vec)
            .unwrap_or_default()
    }

    /// Number of bars retained for a series.
    #[must_use]
    pub fn len_of(&self, key: &SeriesKey) -> usize {
        self.windows.read().get(key).map_or(0, TimeSeriesWindow::len)
    }

    /// Symbols with at least one bar in the given timeframe, sorted.
    #[must_use]
    pub fn symbols(&self, timeframe: &Timeframe) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .windows
            .read()
            .iter()
            .filter(|(key, window)| &key.timeframe == timeframe && !window.is_empty())
            .map(|(key, _)| key.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;

    fn ts(minute: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + Duration::minutes(minute)
    }

    fn bar(minute: i64, close: f64) -> Bar {
        Bar {
            symbol: "SPY".to_string(),
            timeframe: Timeframe::one_minute(),
            timestamp: ts(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            day_volume: None,
        }
    }

    fn closes(window: &TimeSeriesWindow) -> Vec<f64> {
        window.iter().map(|b| b.close).collect()
    }

    #[test]
    fn appends_in_order() {
        let mut window = TimeSeriesWindow::new(5);
        assert_eq!(window.upsert(bar(0, 1.0)), WindowUpdate::Appended);
        assert_eq!(window.upsert(bar(1, 2.0)), WindowUpdate::Appended);
        assert_eq!(window.len(), 2);
        assert_eq!(window.last().unwrap().close, 2.0);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut window = TimeSeriesWindow::new(3);
        for minute in 0..5 {
            window.upsert(bar(minute, minute as f64));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(closes(&window), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn replaces_same_timestamp() {
        let mut window = TimeSeriesWindow::new(3);
        window.upsert(bar(0, 1.0));
        window.upsert(bar(1, 2.0));
        assert_eq!(window.upsert(bar(0, 9.0)), WindowUpdate::Replaced);
        assert_eq!(closes(&window), vec![9.0, 2.0]);
        assert_eq!(window.upsert(bar(1, 8.0)), WindowUpdate::Replaced);
        assert_eq!(closes(&window), vec![9.0, 8.0]);
    }

    #[test]
    fn inserts_late_bar_in_order() {
        let mut window = TimeSeriesWindow::new(5);
        window.upsert(bar(0, 0.0));
        window.upsert(bar(2, 2.0));
        assert_eq!(window.upsert(bar(1, 1.0)), WindowUpdate::Inserted);
        assert_eq!(closes(&window), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn drops_bar_older_than_full_window() {
        let mut window = TimeSeriesWindow::new(2);
        window.upsert(bar(5, 5.0));
        window.upsert(bar(6, 6.0));
        assert_eq!(window.upsert(bar(1, 1.0)), WindowUpdate::Dropped);
        assert_eq!(closes(&window), vec![5.0, 6.0]);
    }

    #[test]
    fn timestamps_strictly_increasing() {
        let mut window = TimeSeriesWindow::new(10);
        for minute in [3, 1, 4, 1, 5, 9, 2, 6, 5, 3] {
            window.upsert(bar(minute, minute as f64));
        }
        let stamps: Vec<_> = window.iter().map(|b| b.timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let window = TimeSeriesWindow::new(0);
        assert_eq!(window.capacity(), 1);
    }

    #[test]
    fn store_snapshots_per_series() {
        let store = WindowStore::new(3);
        store.upsert(bar(0, 1.0));
        store.upsert(bar(1, 2.0));

        let mut other = bar(0, 50.0);
        other.symbol = "IWM".to_string();
        store.upsert(other);

        let spy = SeriesKey::new("SPY", Timeframe::one_minute());
        assert_eq!(store.len_of(&spy), 2);
        assert_eq!(store.snapshot(&spy).len(), 2);
        assert_eq!(
            store.symbols(&Timeframe::one_minute()),
            vec!["IWM".to_string(), "SPY".to_string()]
        );
        assert!(
            store
                .snapshot(&SeriesKey::new("QQQ", Timeframe::one_minute()))
                .is_empty()
        );
    }
}
