//! Ingestion Service
//!
//! Turns decoded candle events into bars, keeps the per-series windows
//! current and upserts every bar to the persistence sink. Quotes, trades and
//! summaries are counted but not stored.
//!
//! Failures are scoped to one event: a candle that cannot form a bar or a
//! failed upsert is logged and the pipeline keeps going. Redelivered candles
//! after a reconnect replace their earlier copies.

use std::sync::Arc;

use crate::application::ports::PersistenceSink;
use crate::domain::market::{BarError, MarketEvent, Timeframe};
use crate::domain::window::{WindowStore, WindowUpdate};
use crate::infrastructure::metrics;

use super::feed_state::FeedState;

/// Result of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Bar stored in the window and, if `persisted`, in the sink.
    Stored {
        /// Window update applied.
        update: WindowUpdate,
        /// The sink accepted the upsert.
        persisted: bool,
    },
    /// Event carries no bar.
    Ignored,
    /// Candle could not form a bar.
    Rejected(BarError),
}

/// Candle ingestion pipeline.
pub struct IngestionService {
    sink: Arc<dyn PersistenceSink>,
    windows: Arc<WindowStore>,
    default_timeframe: Timeframe,
    feed_state: Arc<FeedState>,
}

impl IngestionService {
    /// Create a new ingestion service.
    #[must_use]
    pub fn new(
        sink: Arc<dyn PersistenceSink>,
        windows: Arc<WindowStore>,
        default_timeframe: Timeframe,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            sink,
            windows,
            default_timeframe,
            feed_state,
        }
    }

    /// Ingest one decoded market event.
    pub async fn ingest(&self, event: &MarketEvent) -> IngestOutcome {
        self.feed_state.increment_messages();

        let MarketEvent::Candle(candle) = event else {
            tracing::trace!(kind = %event.kind(), symbol = event.symbol(), "Ignoring non-candle event");
            return IngestOutcome::Ignored;
        };

        let bar = match candle.to_bar(&self.default_timeframe) {
            Ok(bar) => bar,
            Err(e) => {
                tracing::warn!(symbol = %candle.symbol, error = %e, "Dropping candle");
                metrics::record_decode_errors(1);
                return IngestOutcome::Rejected(e);
            }
        };

        let update = self.windows.upsert(bar.clone());
        if update == WindowUpdate::Dropped {
            tracing::debug!(
                symbol = %bar.symbol,
                timestamp = %bar.timestamp,
                "Candle older than window, persisting only"
            );
        }

        let persisted = match self.sink.upsert_bar(&bar.symbol, &bar.timeframe, &bar).await {
            Ok(()) => {
                metrics::record_bar_upserted();
                self.feed_state.increment_bars();
                true
            }
            Err(e) => {
                tracing::error!(
                    symbol = %bar.symbol,
                    timeframe = %bar.timeframe,
                    timestamp = %bar.timestamp,
                    error = %e,
                    "Failed to upsert bar"
                );
                metrics::record_sink_error("upsert_bar");
                false
            }
        };

        IngestOutcome::Stored { update, persisted }
    }
}
