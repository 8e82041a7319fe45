//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: DXLink frames received by message type, keepalives sent
//! - **Events**: Market events decoded by event type, decode errors
//! - **Sessions**: Reconnection attempts, streaming state
//! - **Storage**: Bars upserted, sink errors
//! - **Indicators**: Snapshots written and skipped, cycle duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Protocol
    describe_counter!(
        "dxlink_ingest_frames_received_total",
        "Total DXLink frames received by message type"
    );
    describe_counter!(
        "dxlink_ingest_keepalives_sent_total",
        "Total KEEPALIVE frames sent"
    );
    describe_counter!(
        "dxlink_ingest_reconnects_total",
        "Total DXLink reconnection attempts"
    );
    describe_gauge!(
        "dxlink_ingest_streaming",
        "1 while a DXLink session is streaming"
    );
    describe_gauge!(
        "dxlink_ingest_subscriptions",
        "Active feed subscriptions"
    );

    // Decoding
    describe_counter!(
        "dxlink_ingest_events_decoded_total",
        "Total market events decoded by event type"
    );
    describe_counter!(
        "dxlink_ingest_decode_errors_total",
        "Total compact events that failed to decode"
    );

    // Storage
    describe_counter!(
        "dxlink_ingest_bars_upserted_total",
        "Total bars upserted to the persistence sink"
    );
    describe_counter!(
        "dxlink_ingest_sink_errors_total",
        "Total persistence sink failures by operation"
    );

    // Indicators
    describe_counter!(
        "dxlink_ingest_indicator_snapshots_total",
        "Indicator snapshots by outcome"
    );
    describe_histogram!(
        "dxlink_ingest_indicator_cycle_seconds",
        "Duration of one indicator compute cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome labels for indicator snapshots.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotOutcome {
    /// Snapshot computed and upserted.
    Written,
    /// Symbol skipped this cycle.
    Skipped,
    /// Computation succeeded but the upsert failed.
    Failed,
}

impl SnapshotOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Record a DXLink frame received.
pub fn record_frame_received(message_type: &'static str) {
    counter!(
        "dxlink_ingest_frames_received_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a `KEEPALIVE` frame sent.
pub fn record_keepalive_sent() {
    counter!("dxlink_ingest_keepalives_sent_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("dxlink_ingest_reconnects_total").increment(1);
}

/// Update the streaming flag.
pub fn set_streaming(streaming: bool) {
    gauge!("dxlink_ingest_streaming").set(if streaming { 1.0 } else { 0.0 });
}

/// Update the active subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("dxlink_ingest_subscriptions").set(count as f64);
}

/// Record decoded market events.
pub fn record_events_decoded(kind: EventKind, count: u64) {
    counter!(
        "dxlink_ingest_events_decoded_total",
        "event_type" => kind.as_str()
    )
    .increment(count);
}

/// Record compact events that failed to decode.
pub fn record_decode_errors(count: u64) {
    counter!("dxlink_ingest_decode_errors_total").increment(count);
}

/// Record a bar upserted.
pub fn record_bar_upserted() {
    counter!("dxlink_ingest_bars_upserted_total").increment(1);
}

/// Record a persistence sink failure.
pub fn record_sink_error(operation: &'static str) {
    counter!(
        "dxlink_ingest_sink_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record an indicator snapshot outcome.
pub fn record_snapshot(outcome: SnapshotOutcome) {
    counter!(
        "dxlink_ingest_indicator_snapshots_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record indicator cycle duration.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("dxlink_ingest_indicator_cycle_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_outcome_as_str() {
        assert_eq!(SnapshotOutcome::Written.as_str(), "written");
        assert_eq!(SnapshotOutcome::Skipped.as_str(), "skipped");
        assert_eq!(SnapshotOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("FEED_DATA");
        record_keepalive_sent();
        record_events_decoded(EventKind::Candle, 3);
        record_snapshot(SnapshotOutcome::Written);
        record_cycle_duration(Duration::from_millis(5));
    }
}
