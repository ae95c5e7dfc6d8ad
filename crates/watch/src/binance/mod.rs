//! Binance spot stream connectivity
//!
//! Public market data only, no authentication.

pub mod connection;
pub mod messages;

pub use connection::{ConnectionState, StreamConnection, BINANCE_WS_URL};
pub use messages::{agg_trade_topic, AggTradeRecord, StreamCommand, AGG_TRADE};
