//! Domain Layer - Market data types, windows, and indicator math.
//!
//! This layer contains the core domain types with no I/O. Everything here
//! is synchronous and deterministic.

/// Market events, bars, timeframes, and symbol normalization.
pub mod market;

/// Bounded per-(symbol, timeframe) OHLCV windows.
pub mod window;

/// Technical indicator functions and snapshot assembly.
pub mod indicators;

/// Feed subscription entries and tracking.
pub mod subscription;
