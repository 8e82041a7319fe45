//! Technical Indicators
//!
//! Pure functions over ordered numeric sequences. No I/O, no state carried
//! between calls: every compute cycle recomputes from the full window.
//!
//! # Conventions
//!
//! - Output sequences have the same length as the input.
//! - `None` marks the warm-up period where a value is not yet computable. It
//!   is not an error.
//! - Functions taking several parallel series (high/low/close/volume) use the
//!   length of the shortest series.
//!
//! Indicators implemented:
//! - EMA, SMA
//! - RSI and ATR (Wilder smoothing, constant `1/period`)
//! - Bollinger Bands (population standard deviation)
//! - MACD (line, signal, histogram)
//! - VWAP (cumulative from the start of the window)
//! - RVOL (provisional: last bar against the mean of all prior bars)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::{Bar, Timeframe};

/// Minimum number of bars before RVOL is reported.
pub const RVOL_MIN_BARS: usize = 10;

// =============================================================================
// Moving Averages
// =============================================================================

/// Exponential moving average.
///
/// Seeded with `values[0]`, then `v * k + prev * (1 - k)` with
/// `k = 2 / (period + 1)`. Defined from index 0.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let Some((&first, rest)) = values.split_first() else {
        return Vec::new();
    };

    let k = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    result.push(first);

    let mut prev = first;
    for &value in rest {
        prev = value * k + prev * (1.0 - k);
        result.push(prev);
    }

    result
}

/// Simple moving average of the trailing `period` values.
///
/// `None` for indices `< period - 1`. A zero period yields all `None`.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| trailing_window(values, i, period).map(mean))
        .collect()
}

// =============================================================================
// Oscillators and Volatility
// =============================================================================

/// Relative strength index with Wilder smoothing.
///
/// Initial average gain/loss is the simple mean of the first `period` deltas,
/// thereafter `avg = (avg * (period - 1) + new) / period`. `None` for indices
/// `< period`. Reports 100 whenever the average loss is zero.
#[must_use]
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    let deltas: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let p = period as f64;
    let mut avg_gain = mean(&gains[..period]);
    let mut avg_loss = mean(&losses[..period]);
    result[period] = Some(rsi_value(avg_gain, avg_loss));

    // deltas[i - 1] is the change into index i
    for i in (period + 1)..n {
        avg_gain = avg_gain.mul_add(p - 1.0, gains[i - 1]) / p;
        avg_loss = avg_loss.mul_add(p - 1.0, losses[i - 1]) / p;
        result[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// True range per bar.
///
/// `max(high - low, |high - prev_close|, |low - prev_close|)`; the first
/// bar has no previous close and uses `high - low`.
#[must_use]
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    (0..n)
        .map(|i| {
            let range = highs[i] - lows[i];
            if i == 0 {
                range
            } else {
                let prev_close = closes[i - 1];
                range
                    .max((highs[i] - prev_close).abs())
                    .max((lows[i] - prev_close).abs())
            }
        })
        .collect()
}

/// Average true range with Wilder smoothing.
///
/// The first value, at index `period - 1`, is the simple mean of the first
/// `period` true ranges. `None` before that.
#[must_use]
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let ranges = true_range(highs, lows, closes);
    let n = ranges.len();
    let mut result = vec![None; n];
    if period == 0 || n < period {
        return result;
    }

    let p = period as f64;
    let mut current = mean(&ranges[..period]);
    result[period - 1] = Some(current);

    for i in period..n {
        current = current.mul_add(p - 1.0, ranges[i]) / p;
        result[i] = Some(current);
    }

    result
}

/// Bollinger band series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BollingerBands {
    /// Middle band (SMA).
    pub mid: Vec<Option<f64>>,
    /// Upper band.
    pub upper: Vec<Option<f64>>,
    /// Lower band.
    pub lower: Vec<Option<f64>>,
}

/// Bollinger Bands: `SMA(period) ± mult * population stddev` over the same
/// trailing window. `None` wherever the SMA is `None`.
#[must_use]
pub fn bollinger(values: &[f64], period: usize, mult: f64) -> BollingerBands {
    let mut bands = BollingerBands {
        mid: Vec::with_capacity(values.len()),
        upper: Vec::with_capacity(values.len()),
        lower: Vec::with_capacity(values.len()),
    };

    for i in 0..values.len() {
        match trailing_window(values, i, period) {
            Some(window) => {
                let mid = mean(window);
                let variance = window.iter().map(|x| (x - mid).powi(2)).sum::<f64>()
                    / window.len() as f64;
                let width = mult * variance.sqrt();
                bands.mid.push(Some(mid));
                bands.upper.push(Some(mid + width));
                bands.lower.push(Some(mid - width));
            }
            None => {
                bands.mid.push(None);
                bands.upper.push(None);
                bands.lower.push(None);
            }
        }
    }

    bands
}

/// MACD series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Macd {
    /// `EMA(fast) - EMA(slow)`.
    pub line: Vec<f64>,
    /// `EMA(line, signal)`.
    pub signal: Vec<f64>,
    /// `line - signal`.
    pub histogram: Vec<f64>,
}

/// Moving average convergence/divergence.
#[must_use]
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(l, s)| l - s)
        .collect();

    Macd {
        line,
        signal: signal_line,
        histogram,
    }
}

// =============================================================================
// Volume
// =============================================================================

/// Volume-weighted average price, cumulative from the start of the window.
///
/// Uses the typical price `(high + low + close) / 3`. While cumulative
/// volume is zero the typical price itself is reported.
#[must_use]
pub fn vwap(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let n = highs
        .len()
        .min(lows.len())
        .min(closes.len())
        .min(volumes.len());

    let mut cum_pv = 0.0;
    let mut cum_volume = 0.0;
    (0..n)
        .map(|i| {
            let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
            cum_pv = typical.mul_add(volumes[i], cum_pv);
            cum_volume += volumes[i];
            if cum_volume > 0.0 {
                cum_pv / cum_volume
            } else {
                typical
            }
        })
        .collect()
}

/// Relative volume of the last bar against the mean volume of all prior bars.
///
/// Defined only at the final index; `None` elsewhere, and everywhere when
/// fewer than `RVOL_MIN_BARS` bars are supplied or the prior mean is zero.
///
/// This is a placeholder for a comparison against a historical intraday
/// volume profile.
#[must_use]
pub fn rvol(volumes: &[f64]) -> Vec<Option<f64>> {
    let n = volumes.len();
    let mut result = vec![None; n];
    if n < RVOL_MIN_BARS {
        return result;
    }

    let prior_mean = mean(&volumes[..n - 1]);
    if prior_mean > 0.0 {
        result[n - 1] = Some(volumes[n - 1] / prior_mean);
    }
    result
}

// =============================================================================
// Snapshot
// =============================================================================

/// Indicator periods used for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    /// Short EMA period.
    pub ema_short: usize,
    /// Medium EMA period.
    pub ema_medium: usize,
    /// Long EMA period.
    pub ema_long: usize,
    /// Long SMA period.
    pub sma_long: usize,
    /// RSI period.
    pub rsi: usize,
    /// ATR period.
    pub atr: usize,
    /// Bollinger period.
    pub bollinger: usize,
    /// Bollinger width multiplier.
    pub bollinger_mult: f64,
    /// MACD fast EMA period.
    pub macd_fast: usize,
    /// MACD slow EMA period.
    pub macd_slow: usize,
    /// MACD signal EMA period.
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_short: 9,
            ema_medium: 21,
            ema_long: 50,
            sma_long: 200,
            rsi: 14,
            atr: 14,
            bollinger: 20,
            bollinger_mult: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

impl IndicatorParams {
    /// Check that every period is non-zero and the multiplier is finite.
    ///
    /// # Errors
    ///
    /// Returns `IndicatorComputeError::InvalidParameter` naming the first
    /// offending parameter.
    pub fn validate(&self) -> Result<(), IndicatorComputeError> {
        let periods = [
            ("ema_short", self.ema_short),
            ("ema_medium", self.ema_medium),
            ("ema_long", self.ema_long),
            ("sma_long", self.sma_long),
            ("rsi", self.rsi),
            ("atr", self.atr),
            ("bollinger", self.bollinger),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| *period == 0) {
            return Err(IndicatorComputeError::InvalidParameter(name));
        }
        if !self.bollinger_mult.is_finite() {
            return Err(IndicatorComputeError::InvalidParameter("bollinger_mult"));
        }
        Ok(())
    }
}

/// Most recent indicator values for one symbol.
///
/// Overwrites the prior snapshot for the symbol; not a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Base symbol.
    pub symbol: String,
    /// Timeframe of the bars the snapshot was computed from.
    pub timeframe: Timeframe,
    /// Timestamp of the last bar in the window.
    pub timestamp: DateTime<Utc>,
    /// Number of bars in the window.
    pub bar_count: usize,
    /// VWAP.
    pub vwap: Option<f64>,
    /// Short EMA.
    pub ema_short: Option<f64>,
    /// Medium EMA.
    pub ema_medium: Option<f64>,
    /// Long EMA.
    pub ema_long: Option<f64>,
    /// Long SMA.
    pub sma_long: Option<f64>,
    /// Relative volume (provisional).
    pub rvol: Option<f64>,
    /// RSI.
    pub rsi: Option<f64>,
    /// MACD line.
    pub macd: Option<f64>,
    /// MACD signal.
    pub macd_signal: Option<f64>,
    /// MACD histogram.
    pub macd_hist: Option<f64>,
    /// ATR.
    pub atr: Option<f64>,
    /// Bollinger middle band.
    pub bb_mid: Option<f64>,
    /// Bollinger upper band.
    pub bb_upper: Option<f64>,
    /// Bollinger lower band.
    pub bb_lower: Option<f64>,
}

/// Errors computing one symbol's snapshot. Scoped to that symbol and cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndicatorComputeError {
    /// No bars were available.
    #[error("no bars available for {0}")]
    EmptyWindow(String),
    /// A bar carried a non-finite value.
    #[error("bar {index} has non-finite {field}: {value}")]
    NonFiniteInput {
        /// Position in the window.
        index: usize,
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// Bars were not in strictly increasing timestamp order.
    #[error("bar {0} is not newer than its predecessor")]
    Unordered(usize),
    /// An indicator parameter is unusable.
    #[error("invalid indicator parameter: {0}")]
    InvalidParameter(&'static str),
}

/// Compute the snapshot for the last bar of an ordered window.
///
/// # Errors
///
/// Returns `IndicatorComputeError` if the window is empty, unordered,
/// contains non-finite values, or the parameters are invalid.
pub fn compute_snapshot(
    symbol: &str,
    bars: &[Bar],
    params: &IndicatorParams,
) -> Result<IndicatorSnapshot, IndicatorComputeError> {
    params.validate()?;
    let last = bars
        .last()
        .ok_or_else(|| IndicatorComputeError::EmptyWindow(symbol.to_string()))?;
    validate_bars(bars)?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let bands = bollinger(&closes, params.bollinger, params.bollinger_mult);
    let macd_series = macd(
        &closes,
        params.macd_fast,
        params.macd_slow,
        params.macd_signal,
    );

    Ok(IndicatorSnapshot {
        symbol: symbol.to_string(),
        timeframe: last.timeframe.clone(),
        timestamp: last.timestamp,
        bar_count: bars.len(),
        vwap: last_value(&vwap(&highs, &lows, &closes, &volumes)),
        ema_short: last_value(&ema(&closes, params.ema_short)),
        ema_medium: last_value(&ema(&closes, params.ema_medium)),
        ema_long: last_value(&ema(&closes, params.ema_long)),
        sma_long: last_defined(&sma(&closes, params.sma_long)),
        rvol: last_defined(&rvol(&volumes)),
        rsi: last_defined(&rsi(&closes, params.rsi)),
        macd: last_value(&macd_series.line),
        macd_signal: last_value(&macd_series.signal),
        macd_hist: last_value(&macd_series.histogram),
        atr: last_defined(&atr(&highs, &lows, &closes, params.atr)),
        bb_mid: last_defined(&bands.mid),
        bb_upper: last_defined(&bands.upper),
        bb_lower: last_defined(&bands.lower),
    })
}

fn validate_bars(bars: &[Bar]) -> Result<(), IndicatorComputeError> {
    for (index, bar) in bars.iter().enumerate() {
        let fields = [
            ("open", bar.open),
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
            ("volume", bar.volume),
        ];
        if let Some((field, value)) = fields.into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(IndicatorComputeError::NonFiniteInput {
                index,
                field,
                value,
            });
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(IndicatorComputeError::Unordered(index));
        }
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn trailing_window(values: &[f64], index: usize, period: usize) -> Option<&[f64]> {
    if period == 0 || index + 1 < period {
        return None;
    }
    values.get(index + 1 - period..=index)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn last_value(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

fn last_defined(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    const EPS: f64 = 1e-9;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "SPY".to_string(),
                timeframe: Timeframe::one_minute(),
                timestamp: start + Duration::minutes(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 100.0 + i as f64,
                day_volume: None,
            })
            .collect()
    }

    #[test]
    fn ema_known_values() {
        assert_eq!(
            ema(&[1.0, 2.0, 3.0, 4.0, 5.0], 3),
            vec![1.0, 1.5, 2.25, 3.125, 4.0625]
        );
    }

    #[test]
    fn ema_empty() {
        assert!(ema(&[], 9).is_empty());
    }

    #[test]
    fn sma_known_values() {
        assert_eq!(
            sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3),
            vec![None, None, Some(2.0), Some(3.0), Some(4.0)]
        );
    }

    #[test_case(0 ; "zero period")]
    #[test_case(6 ; "period longer than input")]
    fn sma_undefined(period: usize) {
        assert!(
            sma(&[1.0, 2.0, 3.0, 4.0, 5.0], period)
                .iter()
                .all(Option::is_none)
        );
    }

    #[test]
    fn rsi_all_gains_reports_100() {
        let values: Vec<f64> = (0..20).map(f64::from).collect();
        let result = rsi(&values, 14);
        assert!(result[..14].iter().all(Option::is_none));
        assert!(result[14..].iter().all(|v| *v == Some(100.0)));
    }

    #[test]
    fn rsi_flat_series_reports_100() {
        let result = rsi(&[5.0; 16], 14);
        assert_eq!(result[14], Some(100.0));
        assert_eq!(result[15], Some(100.0));
    }

    #[test]
    fn rsi_all_losses_reports_zero() {
        let values: Vec<f64> = (0..16).rev().map(f64::from).collect();
        let result = rsi(&values, 14);
        assert!(approx(result[15].unwrap(), 0.0));
    }

    #[test]
    fn rsi_wilder_smoothing() {
        // deltas: +1, -1, +2 with period 2
        let result = rsi(&[10.0, 11.0, 10.0, 12.0], 2);
        assert_eq!(result[..2], [None, None]);
        // avg gain 0.5, avg loss 0.5 -> 50
        assert!(approx(result[2].unwrap(), 50.0));
        // avg gain (0.5 + 2) / 2 = 1.25, avg loss (0.5 + 0) / 2 = 0.25 -> rs 5
        assert!(approx(result[3].unwrap(), 100.0 - 100.0 / 6.0));
    }

    #[test]
    fn rsi_insufficient_data() {
        assert!(rsi(&[1.0, 2.0, 3.0], 14).iter().all(Option::is_none));
    }

    #[test]
    fn true_range_uses_previous_close() {
        let ranges = true_range(&[10.0, 12.0], &[8.0, 11.0], &[9.0, 11.5]);
        assert!(approx(ranges[0], 2.0));
        // max(1, |12 - 9|, |11 - 9|) = 3
        assert!(approx(ranges[1], 3.0));
    }

    #[test]
    fn atr_first_value_is_mean_of_true_ranges() {
        let highs = [10.0, 11.0, 12.0, 13.0, 14.0];
        let lows = [9.0, 9.5, 10.0, 12.0, 12.5];
        let closes = [9.5, 10.5, 11.0, 12.5, 13.0];
        let ranges = true_range(&highs, &lows, &closes);
        let result = atr(&highs, &lows, &closes, 3);

        assert_eq!(result[..2], [None, None]);
        let expected_first = (ranges[0] + ranges[1] + ranges[2]) / 3.0;
        assert!(approx(result[2].unwrap(), expected_first));
        let expected_next = (expected_first * 2.0 + ranges[3]) / 3.0;
        assert!(approx(result[3].unwrap(), expected_next));
    }

    #[test]
    fn atr_insufficient_data() {
        assert!(
            atr(&[1.0, 2.0], &[0.5, 1.5], &[0.8, 1.8], 14)
                .iter()
                .all(Option::is_none)
        );
    }

    #[test]
    fn bollinger_population_stddev() {
        let bands = bollinger(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8, 2.0);
        // mean 5, population stddev 2
        assert!(approx(bands.mid[7].unwrap(), 5.0));
        assert!(approx(bands.upper[7].unwrap(), 9.0));
        assert!(approx(bands.lower[7].unwrap(), 1.0));
        assert!(bands.mid[..7].iter().all(Option::is_none));
        assert!(bands.upper[..7].iter().all(Option::is_none));
    }

    #[test]
    fn macd_components() {
        let values: Vec<f64> = (1..=40).map(f64::from).collect();
        let series = macd(&values, 12, 26, 9);
        let fast = ema(&values, 12);
        let slow = ema(&values, 26);
        assert_eq!(series.line.len(), values.len());
        assert!(approx(series.line[39], fast[39] - slow[39]));
        let signal = ema(&series.line, 9);
        assert!(approx(series.signal[39], signal[39]));
        assert!(approx(series.histogram[39], series.line[39] - series.signal[39]));
        assert!(approx(series.line[0], 0.0));
    }

    #[test]
    fn vwap_cumulative() {
        let result = vwap(&[3.0, 6.0], &[3.0, 6.0], &[3.0, 6.0], &[1.0, 2.0]);
        assert!(approx(result[0], 3.0));
        assert!(approx(result[1], 5.0));
    }

    #[test]
    fn vwap_zero_volume_uses_typical_price() {
        let result = vwap(&[4.0], &[2.0], &[3.0], &[0.0]);
        assert!(approx(result[0], 3.0));
    }

    #[test]
    fn rvol_last_index_only() {
        let mut volumes = vec![100.0; 10];
        volumes[9] = 300.0;
        let result = rvol(&volumes);
        assert!(result[..9].iter().all(Option::is_none));
        assert!(approx(result[9].unwrap(), 3.0));
    }

    #[test]
    fn rvol_requires_minimum_bars() {
        assert!(rvol(&[100.0; 9]).iter().all(Option::is_none));
    }

    #[test]
    fn snapshot_uses_last_bar_timestamp() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + f64::from(i) * 0.1).collect();
        let bars = bars_from_closes(&closes);
        let snapshot = compute_snapshot("SPY", &bars, &IndicatorParams::default()).unwrap();

        assert_eq!(snapshot.timestamp, bars[299].timestamp);
        assert_eq!(snapshot.bar_count, 300);
        assert!(snapshot.sma_long.is_some());
        assert_eq!(snapshot.rsi, Some(100.0));
        assert!(snapshot.atr.is_some());
        assert!(snapshot.rvol.is_some());
        assert!(snapshot.bb_lower.unwrap() <= snapshot.bb_mid.unwrap());
    }

    #[test]
    fn snapshot_short_window_leaves_warmup_values_absent() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        let snapshot = compute_snapshot("SPY", &bars, &IndicatorParams::default()).unwrap();
        assert!(snapshot.sma_long.is_none());
        assert!(snapshot.rsi.is_none());
        assert!(snapshot.atr.is_none());
        assert!(snapshot.rvol.is_none());
        assert!(snapshot.ema_short.is_some());
        assert!(snapshot.vwap.is_some());
    }

    #[test]
    fn snapshot_empty_window() {
        let err = compute_snapshot("SPY", &[], &IndicatorParams::default()).unwrap_err();
        assert_eq!(err, IndicatorComputeError::EmptyWindow("SPY".to_string()));
    }

    #[test]
    fn snapshot_rejects_non_finite_input() {
        let mut bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        bars[1].high = f64::NAN;
        let err = compute_snapshot("SPY", &bars, &IndicatorParams::default()).unwrap_err();
        assert!(matches!(
            err,
            IndicatorComputeError::NonFiniteInput {
                index: 1,
                field: "high",
                ..
            }
        ));
    }

    #[test]
    fn snapshot_rejects_unordered_bars() {
        let mut bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        bars.swap(1, 2);
        let err = compute_snapshot("SPY", &bars, &IndicatorParams::default()).unwrap_err();
        assert_eq!(err, IndicatorComputeError::Unordered(2));
    }

    #[test]
    fn params_reject_zero_period() {
        let params = IndicatorParams {
            rsi: 0,
            ..IndicatorParams::default()
        };
        assert_eq!(
            params.validate(),
            Err(IndicatorComputeError::InvalidParameter("rsi"))
        );
    }

    proptest! {
        #[test]
        fn ema_seed_is_first_value(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200),
            period in 1usize..100,
        ) {
            let result = ema(&values, period);
            prop_assert_eq!(result.len(), values.len());
            prop_assert_eq!(result[0], values[0]);
        }

        #[test]
        fn sma_warmup_is_none(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 0..200),
            period in 1usize..50,
        ) {
            let result = sma(&values, period);
            prop_assert_eq!(result.len(), values.len());
            for (i, value) in result.iter().enumerate() {
                prop_assert_eq!(value.is_none(), i + 1 < period);
            }
        }

        #[test]
        fn rsi_is_bounded(
            values in prop::collection::vec(1.0f64..1000.0, 0..200),
            period in 1usize..30,
        ) {
            let result = rsi(&values, period);
            prop_assert_eq!(result.len(), values.len());
            for value in result.into_iter().flatten() {
                prop_assert!(value.is_finite());
                prop_assert!((0.0..=100.0).contains(&value));
            }
        }

        #[test]
        fn bollinger_bands_are_ordered(
            values in prop::collection::vec(1.0f64..1000.0, 0..200),
            period in 1usize..30,
        ) {
            let bands = bollinger(&values, period, 2.0);
            for i in 0..values.len() {
                if let (Some(lower), Some(mid), Some(upper)) =
                    (bands.lower[i], bands.mid[i], bands.upper[i])
                {
                    prop_assert!(lower <= mid + EPS);
                    prop_assert!(mid <= upper + EPS);
                }
            }
        }
    }
}
