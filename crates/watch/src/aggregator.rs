//! Rolling-window volume aggregation and alerting
//!
//! Trades are summed into fixed-width time buckets so the window total can be
//! recomputed without keeping individual trades. Alerts are rate limited: once
//! one fires, the next needs either the cooldown to pass or the volume to
//! exceed the last alerted volume by `exception_percent`.

use chrono::{DateTime, SecondsFormat};
use std::collections::HashMap;
use tracing::debug;

use crate::event::{AlertEvent, Event};
use crate::metrics;
use crate::traits::Aggregator;

pub const DEFAULT_INTERVAL_SECS: f64 = 10.0 * 60.0;
pub const DEFAULT_COOLDOWN_SECS: f64 = 60.0 * 60.0;
pub const DEFAULT_EXCEPTION_PERCENT: f64 = 20.0;
pub const DEFAULT_BUCKET_WIDTH_SECS: f64 = 30.0;

/// Parameters for one `VolumeAggregator`
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSettings {
    pub symbol: String,
    /// Window volume at or above which an alert triggers
    pub threshold: f64,
    /// Window length, seconds
    pub interval: f64,
    /// Minimum seconds between alerts
    pub cooldown: f64,
    /// Growth over the last alerted volume that bypasses the cooldown
    pub exception_percent: f64,
    pub bucket_width: f64,
}

impl VolumeSettings {
    pub fn new(symbol: impl Into<String>, threshold: f64) -> Self {
        Self {
            symbol: symbol.into(),
            threshold,
            interval: DEFAULT_INTERVAL_SECS,
            cooldown: DEFAULT_COOLDOWN_SECS,
            exception_percent: DEFAULT_EXCEPTION_PERCENT,
            bucket_width: DEFAULT_BUCKET_WIDTH_SECS,
        }
    }
}

/// Windowed traded volume for a single instrument
pub struct VolumeAggregator {
    settings: VolumeSettings,
    buckets: HashMap<i64, f64>,
    prev_volume: f64,
    prev_timestamp: f64,
}

impl VolumeAggregator {
    pub fn new(mut settings: VolumeSettings) -> Self {
        settings.symbol = settings.symbol.to_uppercase();
        Self {
            settings,
            buckets: HashMap::new(),
            prev_volume: 0.0,
            prev_timestamp: 0.0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.settings.symbol
    }

    pub fn settings(&self) -> &VolumeSettings {
        &self.settings
    }

    pub fn bucket_index(&self, time: f64) -> i64 {
        (time / self.settings.bucket_width).floor() as i64
    }

    /// Sum of the buckets currently held (no pruning)
    pub fn volume(&self) -> f64 {
        self.buckets.values().sum()
    }

    fn prune(&mut self, now: f64) {
        let threshold = self.bucket_index(now - self.settings.interval);
        self.buckets.retain(|&index, _| index > threshold);
    }

    fn describe(&self, volume: f64, now: f64) -> String {
        // Whole microseconds; a sub-second fraction can never round up to 1s
        let when = DateTime::from_timestamp_micros((now * 1e6).round() as i64)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| format!("{:.3}", now));
        format!(
            "{} -> {}: {:.1} traded in the last {}s",
            when, self.settings.symbol, volume, self.settings.interval
        )
    }
}

impl Aggregator for VolumeAggregator {
    fn digest(&mut self, event: &Event) {
        let trade = match event.as_trade() {
            Some(trade) if trade.symbol == self.settings.symbol => trade,
            _ => return,
        };

        let index = self.bucket_index(trade.time);
        *self.buckets.entry(index).or_insert(0.0) += trade.quantity;
    }

    fn evaluate(&mut self, now: f64) -> Option<AlertEvent> {
        self.prune(now);
        let volume = self.volume();

        let event = AlertEvent {
            value: volume,
            text: self.describe(volume, now),
            timestamp: now,
        };
        debug!(symbol = %self.settings.symbol, volume, text = %event.text, "Evaluated volume");
        metrics::set_window_volume(&self.settings.symbol, volume);

        let trigger = volume >= self.settings.threshold;
        let cool = now > self.settings.cooldown + self.prev_timestamp;
        let significant =
            volume > self.prev_volume * (1.0 + self.settings.exception_percent / 100.0);

        if trigger && (cool || significant) {
            // Suppressed evaluations must leave these untouched
            self.prev_timestamp = now;
            self.prev_volume = volume;
            metrics::inc_alert(&self.settings.symbol);
            return Some(event);
        }

        None
    }
}
