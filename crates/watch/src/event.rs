use serde::Serialize;
use serde_json::Value;

/// Canonical trade, normalized from an exchange record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    /// Epoch seconds (fractional)
    pub time: f64,
}

/// Preprocessed market data record.
/// Record types without a normalizer are carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Trade(TradeEvent),
    Raw(Value),
}

impl Event {
    pub fn as_trade(&self) -> Option<&TradeEvent> {
        match self {
            Event::Trade(trade) => Some(trade),
            Event::Raw(_) => None,
        }
    }
}

/// Result of one aggregator evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    /// Windowed volume
    pub value: f64,
    pub text: String,
    pub timestamp: f64,
}
