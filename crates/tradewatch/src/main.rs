//! tradewatch: trade volume alerting binary
//!
//! Subscribes to aggregate trades on the Binance stream, keeps a rolling
//! volume window per symbol, and posts alerts to the log and optionally Slack.
//! There is no reconnection: when the stream dies the process exits non-zero
//! and its supervisor restarts it.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradewatch_lib::{
    run_server, LogSink, RequestCorrelator, Scheduler, ServerState, SlackSink, StreamConnection,
    SystemClock, VolumeAggregator, WatchConfig, WatchEntry,
};

#[derive(Parser, Debug)]
#[command(name = "tradewatch")]
#[command(about = "Alert on unusual traded volume from the Binance stream")]
struct Args {
    /// Symbol to watch, e.g. ADAUSDT
    #[arg(required_unless_present = "config", requires = "threshold")]
    symbol: Option<String>,

    /// Window volume that triggers an alert
    #[arg(requires = "symbol")]
    threshold: Option<f64>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Slack bot token; alerts go to every channel the bot is in
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to a YAML watch configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Health server bind address (disabled when absent)
    #[arg(long)]
    health_addr: Option<SocketAddr>,

    /// Window length in seconds
    #[arg(long)]
    interval: Option<f64>,

    /// Minimum seconds between alerts
    #[arg(long)]
    cooldown: Option<f64>,

    /// Volume growth (percent) that bypasses the cooldown
    #[arg(long)]
    exception_percent: Option<f64>,

    /// Stream endpoint
    #[arg(long)]
    url: Option<String>,
}

/// Merge the config file (if any) with command-line overrides
fn build_config(args: &Args) -> Result<WatchConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let config = WatchConfig::load(path)?;
            info!(path = %path.display(), watches = config.watches.len(), "Loaded watch configuration");
            config
        }
        None => WatchConfig::default(),
    };

    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let (Some(symbol), Some(threshold)) = (&args.symbol, args.threshold) {
        config.watches.push(WatchEntry::new(symbol.clone(), threshold));
    }
    for watch in config.watches.iter_mut() {
        if let Some(interval) = args.interval {
            watch.interval = interval;
        }
        if let Some(cooldown) = args.cooldown {
            watch.cooldown = cooldown;
        }
        if let Some(exception_percent) = args.exception_percent {
            watch.exception_percent = exception_percent;
        }
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = build_config(&args)?;
    let symbols = config.symbols();
    info!(url = %config.url, symbols = ?symbols, "Starting tradewatch");

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(true).ok();
    });

    let correlator = Arc::new(RequestCorrelator::new());
    let (ingress_tx, ingress_rx) = mpsc::unbounded_channel();
    let conn = StreamConnection::with_subscribe_timeout(
        config.url.clone(),
        correlator,
        ingress_tx,
        Some(config.subscribe_timeout()),
    );

    if let Some(addr) = args.health_addr {
        let state = ServerState::new(symbols.clone(), conn.state_handle());
        tokio::spawn(async move {
            info!(addr = %addr, "Starting health server");
            if let Err(e) = run_server(addr, state).await {
                error!(error = %e, "Health server error");
            }
        });
    }

    let mut conn_task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run().await })
    };

    let mut scheduler = Scheduler::new(ingress_rx, Arc::new(SystemClock), config.cadence_secs);
    for watch in &config.watches {
        scheduler.add_aggregator(Box::new(VolumeAggregator::new(watch.settings())));
    }
    scheduler.add_sink(Box::new(LogSink));
    if let Some(token) = &args.token {
        scheduler.add_sink(Box::new(SlackSink::new(token.clone())?));
        info!("Slack alerts enabled");
    }

    for symbol in &symbols {
        if let Err(e) = conn.subscribe_agg_trades(symbol).await {
            error!(symbol = %symbol, error = %e, "Subscription failed");
            conn.close();
            conn_task.await.ok();
            return Err(e.into());
        }
    }

    let scheduler_task = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    let mut shutdown_wait = shutdown_tx.subscribe();
    let session = tokio::select! {
        result = &mut conn_task => Some(result),
        _ = shutdown_wait.wait_for(|stop| *stop) => None,
    };

    let outcome: Result<(), Box<dyn std::error::Error>> = match session {
        Some(result) => {
            // Stream ended on its own; stop the scheduler too
            shutdown_tx.send(true).ok();
            match result {
                Ok(Ok(())) => {
                    warn!("Stream closed by server");
                    Err("stream closed".into())
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Stream failed");
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            }
        }
        None => {
            conn.close();
            match conn_task.await {
                Ok(Err(e)) => warn!(error = %e, "Stream error during shutdown"),
                Err(e) => warn!(error = %e, "Stream task failed during shutdown"),
                Ok(Ok(())) => {}
            }
            Ok(())
        }
    };

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task failed");
    }

    info!("tradewatch shutdown complete");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_watch() {
        let args = Args::try_parse_from(["tradewatch", "adausdt", "100000"]).unwrap();
        let config = build_config(&args).unwrap();

        assert_eq!(config.symbols(), vec!["ADAUSDT"]);
        assert_eq!(config.watches[0].threshold, 100000.0);
        assert_eq!(config.watches[0].interval, 600.0);
        assert!(args.health_addr.is_none());
    }

    #[test]
    fn test_overrides_apply_to_watch() {
        let args = Args::try_parse_from([
            "tradewatch",
            "ADAUSDT",
            "50",
            "--interval",
            "60",
            "--cooldown",
            "20",
            "--exception-percent",
            "5",
            "--url",
            "ws://127.0.0.1:9000/ws",
        ])
        .unwrap();
        let config = build_config(&args).unwrap();

        let watch = &config.watches[0];
        assert_eq!(watch.interval, 60.0);
        assert_eq!(watch.cooldown, 20.0);
        assert_eq!(watch.exception_percent, 5.0);
        assert_eq!(config.url, "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn test_symbol_requires_threshold() {
        assert!(Args::try_parse_from(["tradewatch", "ADAUSDT"]).is_err());
        assert!(Args::try_parse_from(["tradewatch"]).is_err());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args =
            Args::try_parse_from(["tradewatch", "ADAUSDT", "50", "--interval", "0"]).unwrap();
        assert!(build_config(&args).is_err());
    }
}
