//! Ingest Configuration Settings
//!
//! Configuration types for the ingestion service, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::market::Timeframe;

const DEFAULT_API_BASE: &str = "https://api.tastyworks.com";
const DEFAULT_SYMBOLS: &str = "SPY,IWM";

/// Brokerage session token used to obtain quote tokens.
#[derive(Clone)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a session token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// DXLink connection settings.
#[derive(Debug, Clone)]
pub struct DxLinkSettings {
    /// Channel id requested for the feed.
    pub feed_channel: u32,
    /// Interval between `KEEPALIVE` frames.
    pub keepalive_interval: Duration,
    /// Inbound silence after which the session is recycled.
    pub keepalive_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for DxLinkSettings {
    fn default() -> Self {
        Self {
            feed_channel: 3,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Indicator compute loop settings.
#[derive(Debug, Clone)]
pub struct IndicatorSettings {
    /// Time between compute cycles.
    pub interval: Duration,
    /// Bars fetched per symbol.
    pub window_size: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            window_size: 300,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Brokerage session token.
    pub session_token: SessionToken,
    /// REST API base URL.
    pub api_base: String,
    /// Plain symbols to stream.
    pub symbols: Vec<String>,
    /// Candle timeframe subscribed and windowed.
    pub timeframe: Timeframe,
    /// History requested for candle subscriptions.
    pub candle_lookback: Duration,
    /// DXLink connection settings.
    pub dxlink: DxLinkSettings,
    /// Indicator loop settings.
    pub indicators: IndicatorSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_token = std::env::var("TASTYTRADE_SESSION_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TASTYTRADE_SESSION_TOKEN".to_string()))?;

        if session_token.trim().is_empty() {
            return Err(ConfigError::EmptyValue(
                "TASTYTRADE_SESSION_TOKEN".to_string(),
            ));
        }

        let api_base = std::env::var("TASTYTRADE_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let symbols = std::env::var("STREAM_SYMBOLS")
            .ok()
            .map(|v| parse_symbols(&v))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| parse_symbols(DEFAULT_SYMBOLS));

        let timeframe = std::env::var("CANDLE_TIMEFRAME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map_or_else(Timeframe::default, |v| Timeframe::new(v.trim()));

        let candle_lookback =
            Duration::from_secs(parse_env_u64("CANDLE_LOOKBACK_HOURS", 24).saturating_mul(3_600));

        let dxlink = DxLinkSettings {
            feed_channel: parse_env_u32("DXLINK_FEED_CHANNEL", DxLinkSettings::default().feed_channel),
            keepalive_interval: parse_env_duration_secs(
                "DXLINK_KEEPALIVE_INTERVAL_SECS",
                DxLinkSettings::default().keepalive_interval,
            ),
            keepalive_timeout: parse_env_duration_secs(
                "DXLINK_KEEPALIVE_TIMEOUT_SECS",
                DxLinkSettings::default().keepalive_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "DXLINK_RECONNECT_DELAY_INITIAL_MS",
                DxLinkSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "DXLINK_RECONNECT_DELAY_MAX_SECS",
                DxLinkSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "DXLINK_RECONNECT_DELAY_MULTIPLIER",
                DxLinkSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "DXLINK_MAX_RECONNECT_ATTEMPTS",
                DxLinkSettings::default().max_reconnect_attempts,
            ),
        };

        let indicators = IndicatorSettings {
            interval: parse_env_duration_secs(
                "INDICATOR_INTERVAL_SECS",
                IndicatorSettings::default().interval,
            ),
            window_size: parse_env_usize(
                "INDICATOR_WINDOW_SIZE",
                IndicatorSettings::default().window_size,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("INGEST_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            session_token: SessionToken::new(session_token),
            api_base,
            symbols,
            timeframe,
            candle_lookback,
            dxlink,
            indicators,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma-separated symbol list, trimming and uppercasing entries.
#[must_use]
pub fn parse_symbols(value: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let symbol = symbol.to_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    parse_positive(std::env::var(key).ok().as_deref(), default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_positive(
        std::env::var(key).ok().as_deref(),
        default.as_secs(),
    ))
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_positive(
        std::env::var(key).ok().as_deref(),
        u64::try_from(default.as_millis()).unwrap_or(u64::MAX),
    ))
}

/// Parse a strictly positive value; zero, malformed or unset yields `default`.
fn parse_positive<T>(raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_trimmed_uppercased_and_deduplicated() {
        assert_eq!(parse_symbols(" spy, IWM ,,spy"), vec!["SPY", "IWM"]);
        assert!(parse_symbols(" , ").is_empty());
    }

    #[test]
    fn session_token_redacted_debug() {
        let token = SessionToken::new("secret-session");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-session"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(token.expose(), "secret-session");
    }

    #[test]
    fn dxlink_settings_defaults() {
        let settings = DxLinkSettings::default();
        assert_eq!(settings.feed_channel, 3);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(30));
        assert_eq!(settings.keepalive_timeout, Duration::from_secs(60));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn indicator_settings_defaults() {
        let settings = IndicatorSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.window_size, 300);
    }

    #[test]
    fn server_settings_defaults() {
        assert_eq!(ServerSettings::default().health_port, 8083);
    }

    #[test]
    fn malformed_optional_values_fall_back() {
        assert_eq!(parse_env_u32("DXLINK_INGEST_TEST_UNSET_VAR", 7), 7);
        assert!((parse_env_f64("DXLINK_INGEST_TEST_UNSET_VAR", 2.0) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_intervals_and_sizes_fall_back() {
        assert_eq!(parse_positive::<u64>(Some("0"), 10), 10);
        assert_eq!(parse_positive::<usize>(Some("0"), 300), 300);
        assert_eq!(parse_positive::<u64>(Some("-5"), 30), 30);
        assert_eq!(parse_positive::<u64>(Some("soon"), 30), 30);
        assert_eq!(parse_positive::<u64>(None, 30), 30);
        assert_eq!(parse_positive::<u64>(Some(" 15 "), 30), 15);
        assert_eq!(parse_positive::<usize>(Some("120"), 300), 120);
    }

    #[test]
    fn unset_durations_keep_defaults() {
        assert_eq!(
            parse_env_duration_secs("DXLINK_INGEST_TEST_UNSET_VAR", Duration::from_secs(10)),
            Duration::from_secs(10)
        );
        assert_eq!(
            parse_env_duration_millis("DXLINK_INGEST_TEST_UNSET_VAR", Duration::from_secs(1)),
            Duration::from_millis(1_000)
        );
        assert_eq!(parse_env_usize("DXLINK_INGEST_TEST_UNSET_VAR", 300), 300);
    }
}
