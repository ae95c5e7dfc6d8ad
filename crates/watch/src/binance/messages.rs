//! Binance spot WebSocket message types
//!
//! Only the shapes tradewatch consumes are typed. Everything else stays as
//! `serde_json::Value` so unknown records pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record type tag for aggregate trades
pub const AGG_TRADE: &str = "aggTrade";

/// Outgoing control command
///
/// Sends: `{"method":"SUBSCRIBE","params":["adausdt@aggTrade"],"id":1}`
#[derive(Debug, Clone, Serialize)]
pub struct StreamCommand {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl StreamCommand {
    pub fn subscribe(topics: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params: topics,
            id,
        }
    }
}

/// Stream name for a symbol's aggregate trades (Binance wants lowercase)
pub fn agg_trade_topic(symbol: &str) -> String {
    format!("{}@{}", symbol.to_lowercase(), AGG_TRADE)
}

/// Correlation id of a control reply, `None` for market data
pub fn reply_id(record: &Value) -> Option<u64> {
    record.get("id").and_then(Value::as_u64)
}

/// Aggregate trade record as received
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeRecord {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a", default)]
    pub agg_trade_id: Option<u64>,
    /// Numeric-as-text
    #[serde(rename = "p")]
    pub price: String,
    /// Numeric-as-text
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "f", default)]
    pub first_trade_id: Option<u64>,
    #[serde(rename = "l", default)]
    pub last_trade_id: Option<u64>,
    /// Trade time, epoch milliseconds
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m", default)]
    pub is_buyer_maker: Option<bool>,
}
