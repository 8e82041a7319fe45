//! Full client against a local tokio-tungstenite DXLink server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{STEP_TIMEOUT, StubTokenProvider};
use dxlink_ingest::infrastructure::dxlink::WsConnector;
use dxlink_ingest::{
    DxLinkClient, DxLinkClientConfig, EventKind, MarketEvent, SessionToken, StreamEvent,
    SubscriptionEntry, SubscriptionManager,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Answers each client step the way the gateway does and records what it saw.
async fn serve_one(listener: TcpListener) -> Vec<String> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    let mut seen = Vec::new();

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            if message.is_close() {
                break;
            }
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        let message_type = frame["type"].as_str().unwrap().to_string();

        let replies = match message_type.as_str() {
            "SETUP" => vec![
                json!({"type": "SETUP", "channel": 0, "version": "1.0", "keepaliveTimeout": 60}),
                json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}),
            ],
            "AUTH" => {
                assert_eq!(frame["token"], "loopback-token");
                vec![json!({"type": "AUTH_STATE", "channel": 0, "state": "AUTHORIZED", "userId": "u"})]
            }
            "CHANNEL_REQUEST" => vec![json!({"type": "CHANNEL_OPENED", "channel": frame["channel"]})],
            "FEED_SETUP" => vec![json!({
                "type": "FEED_CONFIG",
                "channel": frame["channel"],
                "dataFormat": "COMPACT",
                "eventFields": {"Quote": ["eventType", "eventSymbol", "bidPrice", "askPrice"]}
            })],
            "FEED_SUBSCRIPTION" => vec![json!({
                "type": "FEED_DATA",
                "channel": frame["channel"],
                "data": [
                    "Quote", ["Quote", "SPY", 500.25, 500.5, "Quote", "IWM", 200.0, null],
                    "Candle", ["Candle", "SPY{=1m}", 1_700_000_060_000_i64, 1.0, 2.0, 0.5, 1.5, 10, "NaN"]
                ]
            })],
            _ => Vec::new(),
        };
        seen.push(message_type);

        for reply in replies {
            ws.send(Message::text(reply.to_string())).await.unwrap();
        }
    }

    seen
}

#[tokio::test]
async fn streams_over_a_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(serve_one(listener));

    let subscriptions = Arc::new(SubscriptionManager::with_entries([
        SubscriptionEntry::new(EventKind::Quote, "SPY"),
        SubscriptionEntry::new(EventKind::Quote, "IWM"),
        SubscriptionEntry::new(EventKind::Candle, "SPY{=1m}"),
    ]));
    let (event_tx, mut events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = Arc::new(DxLinkClient::new(
        DxLinkClientConfig::new(SessionToken::new("session")),
        Arc::new(StubTokenProvider::new("loopback-token", &url)),
        Arc::new(WsConnector),
        subscriptions,
        event_tx,
        cancel.clone(),
    ));
    let run = tokio::spawn(Arc::clone(&client).run());

    let mut quotes = Vec::new();
    let mut candle = None;
    while candle.is_none() {
        let event = tokio::time::timeout(STEP_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        match event {
            StreamEvent::Market(MarketEvent::Quote(quote)) => quotes.push(quote),
            StreamEvent::Market(MarketEvent::Candle(c)) => candle = Some(c),
            StreamEvent::Error(e) => panic!("client error: {e}"),
            _ => {}
        }
    }

    // Server-provided Quote fields replace the requested ones; one array
    // carries two quotes.
    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes[0].symbol, "SPY");
    assert_eq!(quotes[0].ask_price, Some(500.5));
    assert_eq!(quotes[0].bid_size, None);
    assert_eq!(quotes[1].symbol, "IWM");
    assert_eq!(quotes[1].ask_price, None);

    let candle = candle.unwrap();
    assert_eq!(candle.time, Some(1_700_000_060_000));
    assert_eq!(candle.day_volume, None);

    cancel.cancel();
    run.await.unwrap().unwrap();

    let seen = tokio::time::timeout(STEP_TIMEOUT, server).await.unwrap().unwrap();
    let handshake: Vec<&str> = seen
        .iter()
        .map(String::as_str)
        .filter(|t| *t != "KEEPALIVE")
        .collect();
    assert_eq!(
        handshake,
        vec!["SETUP", "AUTH", "CHANNEL_REQUEST", "FEED_SETUP", "FEED_SUBSCRIPTION"]
    );
}
