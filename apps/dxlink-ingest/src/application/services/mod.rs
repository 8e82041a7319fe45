//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `IngestionService`: Candle events to windowed, persisted bars
//! - `IndicatorService`: Periodic per-symbol indicator snapshots
//! - `PeriodicScheduler`: Cancellable fixed-interval runner
//! - `FeedState`: Connection state and counters for health reporting

mod feed_state;
mod indicator_service;
mod ingestion;
mod scheduler;
mod symbols;

pub use feed_state::{ConnectionState, FeedState};
pub use indicator_service::{
    CycleReport, IndicatorService, IndicatorServiceConfig, IndicatorServiceError,
};
pub use ingestion::{IngestOutcome, IngestionService};
pub use scheduler::PeriodicScheduler;
pub use symbols::resolve_streamer_symbols;
