//! Configuration Module
//!
//! Configuration loading for the ingestion service.

mod settings;

pub use settings::{
    ConfigError, DxLinkSettings, IndicatorSettings, IngestConfig, ServerSettings, SessionToken,
    parse_symbols,
};
