//! Normalizes raw exchange records into canonical events
//!
//! Dispatch is on the record's `"e"` type tag. Tags without a handler are
//! returned as `Event::Raw`, so new record shapes flow through the pipeline
//! without breaking it.

use serde_json::Value;

use crate::binance::messages::{AggTradeRecord, AGG_TRADE};
use crate::error::PreprocessError;
use crate::event::{Event, TradeEvent};

type Handler = fn(Value) -> Result<Event, PreprocessError>;

fn handler_for(tag: &str) -> Option<Handler> {
    match tag {
        AGG_TRADE => Some(agg_trade),
        _ => None,
    }
}

/// Convert a raw record into an `Event`
pub fn preprocess(record: Value) -> Result<Event, PreprocessError> {
    let handler = record
        .get("e")
        .and_then(Value::as_str)
        .and_then(handler_for);

    match handler {
        Some(handler) => handler(record),
        None => Ok(Event::Raw(record)),
    }
}

fn agg_trade(record: Value) -> Result<Event, PreprocessError> {
    let raw: AggTradeRecord = serde_json::from_value(record)?;

    Ok(Event::Trade(TradeEvent {
        price: parse_number("p", &raw.price)?,
        quantity: parse_quantity(&raw.quantity)?,
        time: raw.trade_time as f64 / 1000.0,
        symbol: raw.symbol,
    }))
}

fn invalid(field: &'static str, text: &str) -> PreprocessError {
    PreprocessError::InvalidNumber {
        field,
        value: text.to_string(),
    }
}

/// Finite numbers only; "NaN" and "inf" parse as f64 but are rejected
fn parse_number(field: &'static str, text: &str) -> Result<f64, PreprocessError> {
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(invalid(field, text)),
    }
}

fn parse_quantity(text: &str) -> Result<f64, PreprocessError> {
    let quantity = parse_number("q", text)?;
    if quantity < 0.0 {
        return Err(invalid("q", text));
    }
    Ok(quantity)
}
