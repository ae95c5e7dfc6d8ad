use async_trait::async_trait;

use crate::error::SinkError;
use crate::event::{AlertEvent, Event};

/// Alerting engine fed from the shared event stream
pub trait Aggregator: Send {
    /// Fold one event into internal state. Events it does not track are ignored.
    fn digest(&mut self, event: &Event);

    /// Decide whether to alert as of `now` (epoch seconds)
    fn evaluate(&mut self, now: f64) -> Option<AlertEvent>;
}

/// Alert destination (log, chat channel, etc.)
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    /// Deliver one alert
    async fn publish(&mut self, alert: &AlertEvent) -> Result<(), SinkError>;
}
