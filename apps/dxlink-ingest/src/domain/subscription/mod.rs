//! Feed Subscription Types
//!
//! Tracks which (event type, symbol) pairs the feed channel is subscribed
//! to and computes the incremental changes sent upstream.
//!
//! # Design
//!
//! The subscription manager tracks:
//! - One entry per (event type, symbol); `fromTime` is not part of identity
//! - Additions that are new upstream (already-subscribed entries are skipped)
//! - Removals of entries that were actually subscribed
//!
//! The full entry list is re-sent with `reset: true` whenever a fresh
//! session reaches streaming; runtime changes go out as `add` / `remove`
//! lists with `reset: false`.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::market::{EventKind, Timeframe, candle_symbol};

// =============================================================================
// Types
// =============================================================================

/// One subscription as it appears in `FEED_SUBSCRIPTION` add/remove lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventKind,
    /// Streamer symbol (candles include the `{=...}` suffix).
    pub symbol: String,
    /// Backfill start in epoch seconds (candles only).
    #[serde(rename = "fromTime", default, skip_serializing_if = "Option::is_none")]
    pub from_time: Option<i64>,
}

impl SubscriptionEntry {
    /// Create an entry without a backfill start.
    #[must_use]
    pub fn new(event_type: EventKind, symbol: impl Into<String>) -> Self {
        Self {
            event_type,
            symbol: symbol.into(),
            from_time: None,
        }
    }

    /// Set the backfill start (epoch seconds).
    #[must_use]
    pub const fn with_from_time(mut self, from_time: i64) -> Self {
        self.from_time = Some(from_time);
        self
    }

    fn key(&self) -> SubscriptionKey {
        (self.event_type, self.symbol.clone())
    }
}

type SubscriptionKey = (EventKind, String);

/// Build the default subscription plan for a set of streamer symbols.
///
/// Each symbol gets `Trade`, `Quote` and `Summary`, plus a `Candle`
/// subscription on `SYMBOL{=timeframe}` starting at `candle_from_time`.
#[must_use]
pub fn default_plan(
    symbols: &[String],
    timeframe: &Timeframe,
    candle_from_time: Option<i64>,
) -> Vec<SubscriptionEntry> {
    let mut entries = Vec::with_capacity(symbols.len() * 4);
    for symbol in symbols {
        entries.push(SubscriptionEntry::new(EventKind::Trade, symbol.clone()));
        entries.push(SubscriptionEntry::new(EventKind::Quote, symbol.clone()));
        entries.push(SubscriptionEntry::new(EventKind::Summary, symbol.clone()));

        let mut candle = SubscriptionEntry::new(EventKind::Candle, candle_symbol(symbol, timeframe));
        candle.from_time = candle_from_time;
        entries.push(candle);
    }
    entries
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Entries to add.
    pub add: Vec<SubscriptionEntry>,
    /// Entries to remove.
    pub remove: Vec<SubscriptionEntry>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Create changes with only additions.
    #[must_use]
    pub const fn add_only(entries: Vec<SubscriptionEntry>) -> Self {
        Self {
            add: entries,
            remove: Vec::new(),
        }
    }

    /// Create changes with only removals.
    #[must_use]
    pub const fn remove_only(entries: Vec<SubscriptionEntry>) -> Self {
        Self {
            add: Vec::new(),
            remove: entries,
        }
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Thread-safe set of active feed subscriptions.
///
/// # Example
///
/// ```rust
/// use dxlink_ingest::domain::market::EventKind;
/// use dxlink_ingest::domain::subscription::{SubscriptionEntry, SubscriptionManager};
///
/// let manager = SubscriptionManager::new();
///
/// let changes = manager.add([SubscriptionEntry::new(EventKind::Quote, "SPY")]);
/// assert_eq!(changes.add.len(), 1);
///
/// // Already subscribed - nothing to send upstream
/// let changes = manager.add([SubscriptionEntry::new(EventKind::Quote, "SPY")]);
/// assert!(changes.is_empty());
///
/// let changes = manager.remove([SubscriptionEntry::new(EventKind::Quote, "SPY")]);
/// assert_eq!(changes.remove.len(), 1);
/// assert!(manager.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    entries: RwLock<BTreeMap<SubscriptionKey, SubscriptionEntry>>,
}

impl SubscriptionManager {
    /// Create an empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager pre-populated with `entries`.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = SubscriptionEntry>) -> Self {
        let manager = Self::new();
        manager.add(entries);
        manager
    }

    /// Add entries.
    ///
    /// Returns the entries that were not already subscribed.
    pub fn add(&self, entries: impl IntoIterator<Item = SubscriptionEntry>) -> SubscriptionChanges {
        let mut state = self.entries.write();
        let mut added = Vec::new();

        for entry in entries {
            let key = entry.key();
            if state.contains_key(&key) {
                continue;
            }
            state.insert(key, entry.clone());
            added.push(entry);
        }

        SubscriptionChanges::add_only(added)
    }

    /// Remove entries.
    ///
    /// Returns the entries that were actually subscribed.
    pub fn remove(
        &self,
        entries: impl IntoIterator<Item = SubscriptionEntry>,
    ) -> SubscriptionChanges {
        let mut state = self.entries.write();
        let removed = entries
            .into_iter()
            .filter_map(|entry| state.remove(&entry.key()))
            .collect();

        SubscriptionChanges::remove_only(removed)
    }

    /// All active entries, ordered by event type then symbol.
    #[must_use]
    pub fn entries(&self) -> Vec<SubscriptionEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Check whether an (event type, symbol) pair is subscribed.
    #[must_use]
    pub fn contains(&self, event_type: EventKind, symbol: &str) -> bool {
        self.entries
            .read()
            .contains_key(&(event_type, symbol.to_string()))
    }

    /// Number of active entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of active entries per event type.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.entries.read();
        let count = |kind: EventKind| state.keys().filter(|(k, _)| *k == kind).count();
        SubscriptionStats {
            quotes: count(EventKind::Quote),
            trades: count(EventKind::Trade),
            summaries: count(EventKind::Summary),
            candles: count(EventKind::Candle),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription counts by event type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Quote subscriptions.
    pub quotes: usize,
    /// Trade subscriptions.
    pub trades: usize,
    /// Summary subscriptions.
    pub summaries: usize,
    /// Candle subscriptions.
    pub candles: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str) -> SubscriptionEntry {
        SubscriptionEntry::new(EventKind::Quote, symbol)
    }

    #[test]
    fn add_new_entry() {
        let manager = SubscriptionManager::new();
        let changes = manager.add([quote("SPY")]);
        assert_eq!(changes.add, vec![quote("SPY")]);
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn add_existing_entry_is_noop() {
        let manager = SubscriptionManager::new();
        manager.add([quote("SPY")]);
        assert!(manager.add([quote("SPY")]).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn from_time_is_not_part_of_identity() {
        let manager = SubscriptionManager::new();
        manager.add([SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}").with_from_time(10)]);
        let changes =
            manager.add([SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}").with_from_time(20)]);
        assert!(changes.is_empty());
        assert_eq!(manager.entries()[0].from_time, Some(10));
    }

    #[test]
    fn same_symbol_different_types_are_independent() {
        let manager = SubscriptionManager::new();
        manager.add([quote("SPY"), SubscriptionEntry::new(EventKind::Trade, "SPY")]);
        assert_eq!(manager.len(), 2);
        assert!(manager.contains(EventKind::Trade, "SPY"));
        assert!(!manager.contains(EventKind::Summary, "SPY"));
    }

    #[test]
    fn remove_returns_only_subscribed() {
        let manager = SubscriptionManager::new();
        manager.add([quote("SPY")]);
        let changes = manager.remove([quote("SPY"), quote("IWM")]);
        assert_eq!(changes.remove, vec![quote("SPY")]);
        assert!(manager.is_empty());
    }

    #[test]
    fn remove_nonexistent_no_changes() {
        let manager = SubscriptionManager::new();
        assert!(manager.remove([quote("SPY")]).is_empty());
    }

    #[test]
    fn default_plan_per_symbol() {
        let plan = default_plan(&["SPY".to_string()], &Timeframe::one_minute(), Some(1_000));
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], SubscriptionEntry::new(EventKind::Trade, "SPY"));
        assert_eq!(plan[1], SubscriptionEntry::new(EventKind::Quote, "SPY"));
        assert_eq!(plan[2], SubscriptionEntry::new(EventKind::Summary, "SPY"));
        assert_eq!(
            plan[3],
            SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}").with_from_time(1_000)
        );
    }

    #[test]
    fn stats_by_kind() {
        let plan = default_plan(
            &["SPY".to_string(), "IWM".to_string()],
            &Timeframe::one_minute(),
            None,
        );
        let manager = SubscriptionManager::with_entries(plan);
        let stats = manager.stats();
        assert_eq!(stats.quotes, 2);
        assert_eq!(stats.trades, 2);
        assert_eq!(stats.summaries, 2);
        assert_eq!(stats.candles, 2);
    }

    #[test]
    fn entry_wire_format() {
        let entry = SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}").with_from_time(1_700);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "Candle", "symbol": "SPY{=1m}", "fromTime": 1_700})
        );

        let json = serde_json::to_value(quote("SPY")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Quote", "symbol": "SPY"}));
    }

    #[test]
    fn thread_safety_concurrent_adds() {
        use std::sync::Arc;
        use std::thread;

        let manager = Arc::new(SubscriptionManager::new());
        let mut handles = vec![];

        for i in 0..10 {
            let m = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                m.add([quote(&format!("SYM{i}")), quote("SHARED")]);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(manager.len(), 11);
    }
}
