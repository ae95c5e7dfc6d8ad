//! Fixed-cadence control loop
//!
//! Each tick drains the ingress queue into the aggregators, evaluates them if
//! the cadence has elapsed, and hands any alerts to the sinks. Delivery is
//! sink-major: every alert goes to the first sink before the second sink sees
//! any.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::event::AlertEvent;
use crate::metrics;
use crate::preprocess::preprocess;
use crate::traits::{Aggregator, AlertSink};

/// Default seconds between aggregator evaluations
pub const DEFAULT_CADENCE_SECS: f64 = 1.0;

/// Default sleep between ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct Scheduler {
    ingress: mpsc::UnboundedReceiver<Value>,
    aggregators: Vec<Box<dyn Aggregator>>,
    sinks: Vec<Box<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
    cadence: f64,
    poll_interval: Duration,
    last_evaluation: f64,
    ingress_closed: bool,
}

impl Scheduler {
    pub fn new(ingress: mpsc::UnboundedReceiver<Value>, clock: Arc<dyn Clock>, cadence: f64) -> Self {
        let last_evaluation = clock.now();
        Self {
            ingress,
            aggregators: Vec::new(),
            sinks: Vec::new(),
            clock,
            cadence,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_evaluation,
            ingress_closed: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn add_aggregator(&mut self, aggregator: Box<dyn Aggregator>) {
        self.aggregators.push(aggregator);
    }

    /// Sinks receive alerts in the order they were added
    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Feed every queued record to every aggregator without blocking.
    /// Returns the number of records taken off the queue.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        loop {
            let record = match self.ingress.try_recv() {
                Ok(record) => record,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.ingress_closed = true;
                    break;
                }
            };
            drained += 1;

            let event = match preprocess(record) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipping record that failed preprocessing");
                    metrics::inc_preprocess_failure(e.kind());
                    continue;
                }
            };

            for aggregator in self.aggregators.iter_mut() {
                aggregator.digest(&event);
            }
        }
        drained
    }

    /// Evaluate all aggregators if at least one cadence has passed since the
    /// last evaluation
    pub fn evaluate_due(&mut self, now: f64) -> Vec<AlertEvent> {
        if now - self.last_evaluation < self.cadence {
            return Vec::new();
        }
        self.last_evaluation = now;

        let alerts: Vec<AlertEvent> = self
            .aggregators
            .iter_mut()
            .filter_map(|aggregator| aggregator.evaluate(now))
            .collect();

        if !alerts.is_empty() {
            debug!(count = alerts.len(), "Aggregators produced alerts");
        }
        alerts
    }

    /// Deliver alerts sink by sink. A failing sink does not block the rest.
    pub async fn fan_out(&mut self, alerts: &[AlertEvent]) {
        if alerts.is_empty() {
            return;
        }
        for sink in self.sinks.iter_mut() {
            for alert in alerts {
                if let Err(e) = sink.publish(alert).await {
                    warn!(sink = %sink.name(), error = %e, "Sink failed to publish alert");
                    metrics::inc_sink_failure(sink.name());
                }
            }
        }
    }

    /// One pass of drain, evaluate, fan out
    pub async fn tick(&mut self) -> Vec<AlertEvent> {
        self.drain();
        let alerts = self.evaluate_due(self.clock.now());
        self.fan_out(&alerts).await;
        alerts
    }

    /// Tick until shutdown is signalled (or its sender dropped), or the ingress
    /// queue is closed and empty
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            aggregators = self.aggregators.len(),
            sinks = self.sinks.len(),
            cadence_secs = self.cadence,
            "Scheduler started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                    if self.ingress_closed {
                        info!("Ingress queue closed, stopping scheduler");
                        break;
                    }
                }
            }
        }
    }
}
