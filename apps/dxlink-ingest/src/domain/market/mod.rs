//! Market Data Types
//!
//! Canonical internal representation of the events carried by the feed
//! (quotes, trades, summaries, candles) and the OHLCV bar derived from
//! candles.
//!
//! # Symbols
//!
//! Candle subscriptions carry the aggregation period in a suffix, for
//! example `SPY{=1m}`. The base symbol is everything before the first `{`;
//! the timeframe is the value following `=` inside the braces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Kind
// =============================================================================

/// Event types this service negotiates and subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Top-of-book quote.
    Quote,
    /// Last trade.
    Trade,
    /// Daily summary (open/high/low/previous close).
    Summary,
    /// OHLCV candle.
    Candle,
}

impl EventKind {
    /// Every supported event kind.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Quote, Self::Trade, Self::Summary, Self::Candle]
    }

    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Trade => "Trade",
            Self::Summary => "Summary",
            Self::Candle => "Candle",
        }
    }

    /// Look up an event kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Quote" => Some(Self::Quote),
            "Trade" => Some(Self::Trade),
            "Summary" => Some(Self::Summary),
            "Candle" => Some(Self::Candle),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timeframe and Symbols
// =============================================================================

/// Candle aggregation period, e.g. `1m`, `5m`, `1d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeframe(String);

impl Timeframe {
    /// Create a timeframe from its textual form.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// One-minute bars.
    #[must_use]
    pub fn one_minute() -> Self {
        Self::new("1m")
    }

    /// Textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::one_minute()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base symbol of an event symbol: the substring before the first `{`.
#[must_use]
pub fn base_symbol(event_symbol: &str) -> &str {
    event_symbol
        .split_once('{')
        .map_or(event_symbol, |(base, _)| base)
}

/// Build the candle subscription symbol for a base symbol, e.g. `SPY{=1m}`.
#[must_use]
pub fn candle_symbol(symbol: &str, timeframe: &Timeframe) -> String {
    format!("{symbol}{{={timeframe}}}")
}

/// Event symbol split into its base symbol and optional timeframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleSymbol {
    /// Base symbol (e.g. `SPY`).
    pub base: String,
    /// Aggregation period from the `{=...}` suffix, if present.
    pub timeframe: Option<Timeframe>,
}

impl CandleSymbol {
    /// Parse an event symbol such as `SPY{=1m}` or `SPY{=5m,tho=true}`.
    #[must_use]
    pub fn parse(event_symbol: &str) -> Self {
        let base = base_symbol(event_symbol).to_string();
        let timeframe = event_symbol
            .split_once('{')
            .and_then(|(_, attrs)| attrs.strip_suffix('}'))
            .and_then(|attrs| {
                attrs
                    .split(',')
                    .find_map(|attr| attr.strip_prefix('='))
                    .filter(|period| !period.is_empty())
            })
            .map(Timeframe::new);

        Self { base, timeframe }
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// Quote event (numeric fields absent when the feed sends `NaN` or null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Event symbol as received.
    pub symbol: String,
    /// Best bid price.
    pub bid_price: Option<f64>,
    /// Best ask price.
    pub ask_price: Option<f64>,
    /// Bid size.
    pub bid_size: Option<f64>,
    /// Ask size.
    pub ask_size: Option<f64>,
}

/// Trade event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Event symbol as received.
    pub symbol: String,
    /// Last trade price.
    pub price: Option<f64>,
    /// Last trade size.
    pub size: Option<f64>,
    /// Cumulative day volume.
    pub day_volume: Option<f64>,
}

/// Daily summary event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    /// Event symbol as received.
    pub symbol: String,
    /// Day open.
    pub day_open_price: Option<f64>,
    /// Day high.
    pub day_high_price: Option<f64>,
    /// Day low.
    pub day_low_price: Option<f64>,
    /// Previous day close.
    pub prev_day_close_price: Option<f64>,
}

/// Candle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleEvent {
    /// Event symbol as received, including the `{=...}` suffix.
    pub symbol: String,
    /// Candle start time in epoch milliseconds.
    pub time: Option<i64>,
    /// Open price.
    pub open: Option<f64>,
    /// High price.
    pub high: Option<f64>,
    /// Low price.
    pub low: Option<f64>,
    /// Close price.
    pub close: Option<f64>,
    /// Candle volume.
    pub volume: Option<f64>,
    /// Cumulative day volume.
    pub day_volume: Option<f64>,
}

impl CandleEvent {
    /// Convert this candle into a bar keyed by (base symbol, timeframe, time).
    ///
    /// Symbols without a `{=...}` suffix are attributed to `default_timeframe`.
    /// Missing volume is treated as zero.
    ///
    /// # Errors
    ///
    /// Returns `BarError` if the time or any OHLC price is absent, a price
    /// or the volume is not finite, or the time is out of range.
    pub fn to_bar(&self, default_timeframe: &Timeframe) -> Result<Bar, BarError> {
        let parsed = CandleSymbol::parse(&self.symbol);
        let time = self.time.ok_or(BarError::MissingField("time"))?;
        let timestamp =
            DateTime::<Utc>::from_timestamp_millis(time).ok_or(BarError::InvalidTime(time))?;

        Ok(Bar {
            symbol: parsed.base,
            timeframe: parsed
                .timeframe
                .unwrap_or_else(|| default_timeframe.clone()),
            timestamp,
            open: required_price(self.open, "open")?,
            high: required_price(self.high, "high")?,
            low: required_price(self.low, "low")?,
            close: required_price(self.close, "close")?,
            volume: finite(self.volume.unwrap_or(0.0), "volume")?,
            day_volume: self.day_volume.filter(|v| v.is_finite()),
        })
    }
}

fn required_price(value: Option<f64>, field: &'static str) -> Result<f64, BarError> {
    finite(value.ok_or(BarError::MissingField(field))?, field)
}

fn finite(value: f64, field: &'static str) -> Result<f64, BarError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(BarError::NonFinite(field))
    }
}

/// Decoded market event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Quote.
    Quote(QuoteEvent),
    /// Trade.
    Trade(TradeEvent),
    /// Summary.
    Summary(SummaryEvent),
    /// Candle.
    Candle(CandleEvent),
}

impl MarketEvent {
    /// Event kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Quote(_) => EventKind::Quote,
            Self::Trade(_) => EventKind::Trade,
            Self::Summary(_) => EventKind::Summary,
            Self::Candle(_) => EventKind::Candle,
        }
    }

    /// Event symbol as received.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Summary(e) => &e.symbol,
            Self::Candle(e) => &e.symbol,
        }
    }

    /// Base symbol with any `{...}` suffix removed.
    #[must_use]
    pub fn base_symbol(&self) -> &str {
        base_symbol(self.symbol())
    }
}

// =============================================================================
// Bar
// =============================================================================

/// OHLCV bar. Unique per (symbol, timeframe, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Base symbol.
    pub symbol: String,
    /// Aggregation period.
    pub timeframe: Timeframe,
    /// Bar start time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Bar volume.
    pub volume: f64,
    /// Cumulative day volume, when the feed provides it.
    pub day_volume: Option<f64>,
}

impl Bar {
    /// Typical price `(high + low + close) / 3`.
    #[must_use]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Errors converting a candle into a bar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarError {
    /// A required field was absent.
    #[error("candle is missing required field `{0}`")]
    MissingField(&'static str),
    /// The candle time cannot be represented.
    #[error("candle time {0} is out of range")]
    InvalidTime(i64),
    /// A price or volume is infinite or NaN.
    #[error("candle field `{0}` is not finite")]
    NonFinite(&'static str),
}
