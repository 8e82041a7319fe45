//! Periodic Scheduler
//!
//! Runs a unit of work on a fixed cadence until cancelled. Runs never
//! overlap: a slow run delays the next tick instead of stacking up.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Fixed-interval runner stopped by a cancellation token.
#[derive(Debug, Clone)]
pub struct PeriodicScheduler {
    interval: Duration,
    cancel: CancellationToken,
}

impl PeriodicScheduler {
    /// Create a scheduler ticking every `interval`.
    #[must_use]
    pub const fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `task` immediately and then once per interval until cancelled.
    ///
    /// Returns the number of completed runs.
    pub async fn run<F, Fut>(&self, name: &'static str, mut task: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(
            task = name,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Starting periodic task"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0_u64;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::info!(task = name, runs, "Periodic task stopped");
                    return runs;
                }

                _ = ticker.tick() => {
                    tokio::select! {
                        biased;

                        () = self.cancel.cancelled() => {
                            tracing::info!(task = name, runs, "Periodic task cancelled mid-run");
                            return runs;
                        }

                        () = task() => {
                            runs += 1;
                        }
                    }
                }
            }
        }
    }
}
