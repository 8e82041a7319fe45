//! Keepalive Task
//!
//! Sends `KEEPALIVE` on the control channel at a fixed interval for the
//! whole life of a session, independently of handshake progress, and
//! watches inbound activity. Silence longer than the keepalive timeout is
//! reported so the session can be recycled.
//!
//! The task only ever touches the transport through `send`, which is
//! serialized, so it never blocks the receive loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::codec::DxLinkCodec;
use super::messages::OutboundMessage;
use super::transport::Transport;
use crate::infrastructure::config::DxLinkSettings;
use crate::infrastructure::metrics;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Interval between `KEEPALIVE` frames.
    pub interval: Duration,
    /// Inbound silence after which the connection is considered dead.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

impl KeepaliveConfig {
    /// Build from the DXLink settings.
    #[must_use]
    pub const fn from_settings(settings: &DxLinkSettings) -> Self {
        Self {
            interval: settings.keepalive_interval,
            timeout: settings.keepalive_timeout,
        }
    }
}

/// Why the keepalive task stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveFailure {
    /// No inbound frame within the timeout.
    Timeout(Duration),
    /// Writing a `KEEPALIVE` frame failed.
    SendFailed(String),
}

/// Inbound activity shared between the receive loop and the keepalive task.
#[derive(Debug)]
pub struct ActivityTracker {
    last_inbound: RwLock<Instant>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Create a tracker that counts from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame was received.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Handle to a running keepalive task.
///
/// Dropping the handle cancels the task; `stop` also waits for it to exit.
pub struct KeepaliveHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    failures: mpsc::Receiver<KeepaliveFailure>,
}

impl KeepaliveHandle {
    /// Spawn the keepalive task for a session.
    #[must_use]
    pub fn spawn(
        config: KeepaliveConfig,
        transport: Arc<dyn Transport>,
        activity: Arc<ActivityTracker>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (failure_tx, failures) = mpsc::channel(1);
        let task = tokio::spawn(run(config, transport, activity, failure_tx, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
            failures,
        }
    }

    /// Wait until the task reports a failure.
    ///
    /// Pends forever once the task has exited without one.
    pub async fn failure(&mut self) -> KeepaliveFailure {
        match self.failures.recv().await {
            Some(failure) => failure,
            None => std::future::pending().await,
        }
    }

    /// Cancel the task and wait for it to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Keepalive task ended abnormally");
            }
        }
    }
}

impl Drop for KeepaliveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    config: KeepaliveConfig,
    transport: Arc<dyn Transport>,
    activity: Arc<ActivityTracker>,
    failure_tx: mpsc::Sender<KeepaliveFailure>,
    cancel: CancellationToken,
) {
    let codec = DxLinkCodec::new();
    let mut interval = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Keepalive task cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        let idle = activity.idle();
        if idle > config.timeout {
            tracing::warn!(
                idle_secs = idle.as_secs(),
                timeout_secs = config.timeout.as_secs(),
                "Keepalive timeout detected"
            );
            let _ = failure_tx.send(KeepaliveFailure::Timeout(idle)).await;
            return;
        }

        let frame = match codec.encode(&OutboundMessage::keepalive()) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = failure_tx.send(KeepaliveFailure::SendFailed(e.to_string())).await;
                return;
            }
        };

        let sent = tokio::select! {
            () = cancel.cancelled() => return,
            sent = transport.send(frame) => sent,
        };

        match sent {
            Ok(()) => {
                metrics::record_keepalive_sent();
                tracing::trace!("Sent KEEPALIVE");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send KEEPALIVE");
                let _ = failure_tx.send(KeepaliveFailure::SendFailed(e.to_string())).await;
                return;
            }
        }
    }
}
