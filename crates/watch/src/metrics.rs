//! Prometheus metrics for the watcher
//!
//! Covers message flow on the stream, preprocessing, alerting, and sink delivery.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, register_int_gauge, Encoder, GaugeVec,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Labels used for metrics
const LABEL_KIND: &str = "kind";
const LABEL_SYMBOL: &str = "symbol";
const LABEL_SINK: &str = "sink";

/// Inbound stream messages by kind (market, reply, stale_reply, undecodable)
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradewatch_messages_total",
        "Total messages received on the stream",
        &[LABEL_KIND]
    )
    .expect("Failed to register messages_total metric")
});

/// Records dropped because preprocessing failed
static PREPROCESS_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradewatch_preprocess_failures_total",
        "Records dropped because they could not be preprocessed",
        &[LABEL_KIND]
    )
    .expect("Failed to register preprocess_failures_total metric")
});

/// Alerts emitted per symbol
static ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradewatch_alerts_total",
        "Alerts emitted by volume aggregators",
        &[LABEL_SYMBOL]
    )
    .expect("Failed to register alerts_total metric")
});

/// Windowed volume at the last evaluation per symbol
static WINDOW_VOLUME: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tradewatch_window_volume",
        "Volume in the rolling window at the last evaluation",
        &[LABEL_SYMBOL]
    )
    .expect("Failed to register window_volume metric")
});

/// Failed deliveries per sink
static SINK_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradewatch_sink_failures_total",
        "Alert deliveries that failed, per sink",
        &[LABEL_SINK]
    )
    .expect("Failed to register sink_failures_total metric")
});

/// WebSocket connection status (1 = open, 0 = not open)
static WEBSOCKET_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tradewatch_websocket_connected",
        "WebSocket connection status (1=open, 0=not open)"
    )
    .expect("Failed to register websocket_connected metric")
});

pub fn inc_message(kind: &str) {
    MESSAGES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn inc_preprocess_failure(kind: &str) {
    PREPROCESS_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn inc_alert(symbol: &str) {
    ALERTS_TOTAL.with_label_values(&[symbol]).inc();
}

pub fn set_window_volume(symbol: &str, volume: f64) {
    WINDOW_VOLUME.with_label_values(&[symbol]).set(volume);
}

pub fn inc_sink_failure(sink: &str) {
    SINK_FAILURES_TOTAL.with_label_values(&[sink]).inc();
}

pub fn set_connected(connected: bool) {
    WEBSOCKET_CONNECTED.set(i64::from(connected));
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
