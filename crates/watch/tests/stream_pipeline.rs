//! Integration tests for the stream connection and alert pipeline.
//!
//! Each test runs a throwaway WebSocket server on 127.0.0.1 that speaks the
//! Binance control protocol (SUBSCRIBE command, `{"result":null,"id":N}`
//! reply) and pushes aggTrade records. No network access is needed.
//!
//! Run with: cargo test -p tradewatch-lib --test stream_pipeline

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use tradewatch_lib::{
    AlertEvent, AlertSink, ConnectionError, ConnectionState, ManualClock, RequestCorrelator,
    Scheduler, SinkError, StreamConnection, VolumeAggregator, VolumeSettings,
};

type ServerStream = WebSocketStream<TcpStream>;

/// Start a one-connection server and return its ws:// URL
async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: FnOnce(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    format!("ws://{}", addr)
}

/// Read frames until a SUBSCRIBE command arrives; returns (id, params)
async fn read_subscribe(ws: &mut ServerStream) -> (u64, Vec<String>) {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            let cmd: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(cmd["method"], "SUBSCRIBE");
            let params = cmd["params"]
                .as_array()
                .unwrap()
                .iter()
                .map(|p| p.as_str().unwrap().to_string())
                .collect();
            return (cmd["id"].as_u64().unwrap(), params);
        }
    }
    panic!("client went away before subscribing");
}

/// Hold the socket open until the client closes it
async fn drain_until_close(ws: &mut ServerStream) {
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_close() {
            break;
        }
    }
}

fn agg_trade(symbol: &str, quantity: &str, trade_time_ms: u64) -> Value {
    json!({
        "e": "aggTrade",
        "E": trade_time_ms + 5,
        "s": symbol,
        "a": 1,
        "p": "0.3812",
        "q": quantity,
        "f": 10,
        "l": 12,
        "T": trade_time_ms,
        "m": false
    })
}

fn connect(
    url: &str,
    timeout: Option<Duration>,
) -> (
    StreamConnection,
    Arc<RequestCorrelator<Value>>,
    mpsc::UnboundedReceiver<Value>,
) {
    let correlator = Arc::new(RequestCorrelator::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = StreamConnection::with_subscribe_timeout(url, correlator.clone(), tx, timeout);
    (conn, correlator, rx)
}

#[derive(Clone, Default)]
struct CaptureSink {
    alerts: Arc<Mutex<Vec<AlertEvent>>>,
}

#[async_trait]
impl AlertSink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    async fn publish(&mut self, alert: &AlertEvent) -> Result<(), SinkError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

// =============================================================================
// Subscription
// =============================================================================

#[tokio::test]
async fn test_subscribe_then_receive_market_data() {
    let url = spawn_server(|mut ws| async move {
        let (id, params) = read_subscribe(&mut ws).await;
        assert_eq!(params, vec!["adausdt@aggTrade".to_string()]);

        ws.send(Message::Text(json!({"result": null, "id": id}).to_string()))
            .await
            .unwrap();
        for (i, qty) in ["1.5", "2.0", "3.25"].iter().enumerate() {
            let record = agg_trade("ADAUSDT", qty, 1_700_000_000_000 + i as u64);
            ws.send(Message::Text(record.to_string())).await.unwrap();
        }
        drain_until_close(&mut ws).await;
    })
    .await;

    let (conn, correlator, mut rx) = connect(&url, Some(Duration::from_secs(5)));
    let runner = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };

    let reply = conn.subscribe_agg_trades("ADAUSDT").await.unwrap();
    assert_eq!(reply["result"], Value::Null);
    assert_eq!(correlator.pending(), 0);
    assert_eq!(conn.state(), ConnectionState::Open);

    let mut quantities = Vec::new();
    for _ in 0..3 {
        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["e"], "aggTrade");
        assert!(record.get("id").is_none());
        quantities.push(record["q"].as_str().unwrap().to_string());
    }
    assert_eq!(quantities, vec!["1.5", "2.0", "3.25"]);

    conn.close();
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_subscribe_rejected() {
    let url = spawn_server(|mut ws| async move {
        let (id, _) = read_subscribe(&mut ws).await;
        let reply = json!({"error": {"code": 2, "msg": "Invalid request"}, "id": id});
        ws.send(Message::Text(reply.to_string())).await.unwrap();
        drain_until_close(&mut ws).await;
    })
    .await;

    let (conn, _correlator, _rx) = connect(&url, Some(Duration::from_secs(5)));
    let runner = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };

    let err = conn.subscribe_agg_trades("ADAUSDT").await.unwrap_err();
    assert!(matches!(err, ConnectionError::SubscriptionFailed(_)));

    conn.close();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_subscribe_timeout_evicts_request() {
    let url = spawn_server(|mut ws| async move {
        let (id, _) = read_subscribe(&mut ws).await;
        // Reply only after the client has given up
        tokio::time::sleep(Duration::from_millis(300)).await;
        ws.send(Message::Text(json!({"result": null, "id": id}).to_string()))
            .await
            .unwrap();
        drain_until_close(&mut ws).await;
    })
    .await;

    let (conn, correlator, mut rx) = connect(&url, Some(Duration::from_millis(100)));
    let runner = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };

    let err = conn.subscribe_agg_trades("ADAUSDT").await.unwrap_err();
    assert!(matches!(err, ConnectionError::SubscribeTimeout(_)));
    assert_eq!(correlator.pending(), 0);

    // The late reply is dropped, not forwarded as market data
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(correlator.pending(), 0);

    conn.close();
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_close_fails_outstanding_subscribe() {
    let url = spawn_server(|mut ws| async move {
        read_subscribe(&mut ws).await;
        ws.close(None).await.unwrap();
    })
    .await;

    // No subscribe timeout: only the close can end the wait
    let (conn, correlator, _rx) = connect(&url, None);
    let runner = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };

    let result = tokio::time::timeout(Duration::from_secs(5), conn.subscribe_agg_trades("ADAUSDT"))
        .await
        .expect("subscribe still waiting after server close");
    assert!(matches!(result, Err(ConnectionError::NotOpen)));
    assert!(conn.state().is_terminal());
    assert_eq!(correlator.pending(), 0);

    runner.await.unwrap().ok();
}

#[tokio::test]
async fn test_server_close_ends_run() {
    let url = spawn_server(|mut ws| async move {
        ws.close(None).await.unwrap();
    })
    .await;

    let (conn, _correlator, _rx) = connect(&url, None);
    let result = tokio::time::timeout(Duration::from_secs(5), conn.run())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(conn.state(), ConnectionState::Closed);

    // Subscribing on a finished connection fails fast
    let err = conn.subscribe_agg_trades("ADAUSDT").await.unwrap_err();
    assert!(matches!(err, ConnectionError::NotOpen));
}

// =============================================================================
// Pipeline: stream -> scheduler -> aggregator -> sink
// =============================================================================

#[tokio::test]
async fn test_trades_raise_volume_alert() {
    // Trades at t=1000s: 10 + 10 + 10 ADA, plus one BTC trade that must be ignored
    let url = spawn_server(|mut ws| async move {
        let (id, _) = read_subscribe(&mut ws).await;
        ws.send(Message::Text(json!({"result": null, "id": id}).to_string()))
            .await
            .unwrap();
        for record in [
            agg_trade("ADAUSDT", "10", 1_000_000),
            agg_trade("BTCUSDT", "500", 1_000_100),
            agg_trade("ADAUSDT", "10", 1_000_200),
            agg_trade("ADAUSDT", "10", 1_000_400),
        ] {
            ws.send(Message::Text(record.to_string())).await.unwrap();
        }
        drain_until_close(&mut ws).await;
    })
    .await;

    let (conn, _correlator, rx) = connect(&url, Some(Duration::from_secs(5)));
    let runner = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };
    conn.subscribe_agg_trades("ADAUSDT").await.unwrap();

    let clock = Arc::new(ManualClock::new(1000.0));
    let mut scheduler = Scheduler::new(rx, clock.clone(), 1.0);
    scheduler.add_aggregator(Box::new(VolumeAggregator::new(VolumeSettings {
        symbol: "ADAUSDT".to_string(),
        threshold: 25.0,
        interval: 60.0,
        cooldown: 3600.0,
        exception_percent: 20.0,
        bucket_width: 1.0,
    })));
    let sink = CaptureSink::default();
    scheduler.add_sink(Box::new(sink.clone()));

    let mut alerts = Vec::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        clock.advance(1.0);
        alerts.extend(scheduler.tick().await);
        if !alerts.is_empty() {
            break;
        }
    }

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].value, 30.0);
    assert!(alerts[0]
        .text
        .ends_with("ADAUSDT: 30.0 traded in the last 60s"));

    // Cooldown holds and the volume has not grown
    clock.advance(1.0);
    assert!(scheduler.tick().await.is_empty());

    let delivered = sink.alerts.lock().unwrap().clone();
    assert_eq!(delivered, alerts);

    conn.close();
    runner.await.unwrap().unwrap();
}
