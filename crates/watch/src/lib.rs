//! tradewatch-lib: exchange stream watching and volume alerting
//!
//! This crate provides the pieces for subscribing to an exchange WebSocket
//! stream, normalizing its records into events, aggregating trade volume over
//! rolling windows, and delivering alerts to sinks.

pub mod aggregator;
pub mod binance;
pub mod clock;
pub mod config;
pub mod correlator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod preprocess;
pub mod scheduler;
pub mod server;
pub mod sink;
pub mod traits;

pub use aggregator::{VolumeAggregator, VolumeSettings};
pub use binance::{ConnectionState, StreamConnection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{WatchConfig, WatchEntry};
pub use correlator::RequestCorrelator;
pub use error::{ConfigError, ConnectionError, CorrelatorError, PreprocessError, SinkError};
pub use event::{AlertEvent, Event, TradeEvent};
pub use preprocess::preprocess;
pub use scheduler::Scheduler;
pub use server::{create_router, run_server, ServerState};
pub use sink::{LogSink, SlackSink};
pub use traits::{Aggregator, AlertSink};
