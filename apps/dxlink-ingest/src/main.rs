//! DXLink Ingest Binary
//!
//! Streams candles for the configured symbols and writes indicator snapshots.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dxlink-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TASTYTRADE_SESSION_TOKEN`: Brokerage session token
//!
//! ## Optional
//! - `TASTYTRADE_API_BASE`: REST base URL (default: <https://api.tastyworks.com>)
//! - `STREAM_SYMBOLS`: Comma-separated symbols (default: SPY,IWM)
//! - `CANDLE_TIMEFRAME`: Candle period (default: 1m)
//! - `CANDLE_LOOKBACK_HOURS`: Candle history requested on subscribe (default: 24)
//! - `INDICATOR_INTERVAL_SECS`: Indicator cycle interval (default: 10)
//! - `INDICATOR_WINDOW_SIZE`: Bars per indicator window (default: 300)
//! - `INGEST_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `DXLINK_*`: Channel, keepalive and reconnect tuning
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: `dxlink_ingest=info`)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dxlink_ingest::infrastructure::dxlink::WsConnector;
use dxlink_ingest::infrastructure::health::{HealthServer, HealthServerState};
use dxlink_ingest::infrastructure::metrics;
use dxlink_ingest::infrastructure::persistence::InMemorySink;
use dxlink_ingest::infrastructure::tastytrade::TastytradeTokenProvider;
use dxlink_ingest::infrastructure::telemetry;
use dxlink_ingest::{
    ConnectionState, DxLinkClient, DxLinkClientConfig, FeedState, IndicatorService,
    IndicatorServiceConfig, IngestConfig, IngestionService, PeriodicScheduler, PersistenceSink,
    StreamEvent, SubscriptionManager, TokenProvider, WindowStore, default_plan, init_metrics,
    resolve_streamer_symbols,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting DXLink ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = IngestConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let token_provider: Arc<dyn TokenProvider> =
        Arc::new(TastytradeTokenProvider::new(config.api_base.clone())?);
    let sink: Arc<dyn PersistenceSink> = Arc::new(InMemorySink::new());
    let windows = Arc::new(WindowStore::new(config.indicators.window_size));
    let feed_state = Arc::new(FeedState::new());

    let symbols = resolve_streamer_symbols(
        token_provider.as_ref(),
        config.session_token.expose(),
        &config.symbols,
    )
    .await?;

    let lookback = chrono::Duration::from_std(config.candle_lookback)?;
    let from_time = (Utc::now() - lookback).timestamp();
    let subscriptions = Arc::new(SubscriptionManager::with_entries(default_plan(
        &symbols,
        &config.timeframe,
        Some(from_time),
    )));
    metrics::set_subscriptions(subscriptions.len());
    tracing::info!(
        symbols = ?symbols,
        subscriptions = subscriptions.len(),
        from_time,
        "Subscription plan built"
    );

    // Streaming client
    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    let client = Arc::new(DxLinkClient::new(
        DxLinkClientConfig::from_settings(config.session_token.clone(), &config.dxlink),
        Arc::clone(&token_provider),
        Arc::new(WsConnector),
        Arc::clone(&subscriptions),
        event_tx,
        shutdown_token.clone(),
    ));

    let ingestion = Arc::new(IngestionService::new(
        Arc::clone(&sink),
        Arc::clone(&windows),
        config.timeframe.clone(),
        Arc::clone(&feed_state),
    ));

    let indicator_service = Arc::new(IndicatorService::new(
        IndicatorServiceConfig {
            timeframe: config.timeframe.clone(),
            window_size: config.indicators.window_size,
            symbols: symbols.clone(),
            ..IndicatorServiceConfig::default()
        },
        Arc::clone(&sink),
        Arc::clone(&windows),
        Arc::clone(&feed_state),
    ));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&subscriptions),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Spawn stream event handler
    let pump_feed_state = Arc::clone(&feed_state);
    tasks.push(tokio::spawn(async move {
        handle_stream_events(event_rx, ingestion, pump_feed_state).await;
    }));

    // Spawn DXLink client
    feed_state.set_state(ConnectionState::Connecting);
    let client_feed_state = Arc::clone(&feed_state);
    tasks.push(tokio::spawn(async move {
        if let Err(e) = client.run().await {
            client_feed_state.set_error(e.to_string());
            tracing::error!(error = %e, "DXLink client stopped with error");
        }
    }));

    // Spawn indicator loop
    let scheduler = PeriodicScheduler::new(config.indicators.interval, shutdown_token.clone());
    tasks.push(tokio::spawn(async move {
        scheduler
            .run("indicator_cycle", || {
                let service = Arc::clone(&indicator_service);
                async move {
                    service.run_cycle().await;
                }
            })
            .await;
    }));

    // Spawn health server
    tasks.push(tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    }));

    tracing::info!("DXLink ingest ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Tasks still running at shutdown timeout"
        );
    }

    tracing::info!("DXLink ingest stopped");
    Ok(())
}

/// Handle events from the DXLink client.
async fn handle_stream_events(
    mut rx: mpsc::Receiver<StreamEvent>,
    ingestion: Arc<IngestionService>,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Connected { connection_id } => {
                feed_state.set_state(ConnectionState::Connecting);
                tracing::info!(%connection_id, "DXLink feed connected");
            }
            StreamEvent::Streaming => {
                feed_state.set_state(ConnectionState::Streaming);
                tracing::info!("DXLink feed streaming");
            }
            StreamEvent::Disconnected => {
                feed_state.set_state(ConnectionState::Disconnected);
                tracing::warn!("DXLink feed disconnected");
            }
            StreamEvent::Reconnecting { attempt } => {
                feed_state.set_state(ConnectionState::Reconnecting);
                feed_state.set_reconnect_attempt(attempt);
                tracing::info!(attempt, "DXLink feed reconnecting");
            }
            StreamEvent::Market(event) => {
                ingestion.ingest(&event).await;
            }
            StreamEvent::Error(msg) => {
                feed_state.set_error(msg.clone());
                tracing::error!(error = %msg, "DXLink feed error");
            }
        }
    }
    tracing::debug!("Stream event channel closed");
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        api_base = %config.api_base,
        symbols = ?config.symbols,
        timeframe = %config.timeframe,
        candle_lookback_secs = config.candle_lookback.as_secs(),
        indicator_interval_secs = config.indicators.interval.as_secs(),
        window_size = config.indicators.window_size,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(dxlink = ?config.dxlink, "DXLink settings");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
