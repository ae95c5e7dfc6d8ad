//! Binance spot WebSocket stream
//!
//! One socket carries both market data and replies to our control commands.
//! Replies are recognized by their `id` field and handed to the
//! `RequestCorrelator`; everything else goes onto the ingress queue unchanged.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::binance::messages::{agg_trade_topic, reply_id, StreamCommand};
use crate::correlator::RequestCorrelator;
use crate::error::ConnectionError;
use crate::metrics;

/// Binance spot public stream URL
pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Default bound on waiting for a subscription reply
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }
}

enum Outbound {
    Text(String),
    Close,
}

struct Shared {
    url: String,
    correlator: Arc<RequestCorrelator<Value>>,
    ingress: mpsc::UnboundedSender<Value>,
    state: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Taken by `run`
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    subscribe_timeout: Option<Duration>,
}

/// Duplex stream connection. Clones share the same socket.
#[derive(Clone)]
pub struct StreamConnection {
    shared: Arc<Shared>,
}

impl StreamConnection {
    pub fn new(
        url: impl Into<String>,
        correlator: Arc<RequestCorrelator<Value>>,
        ingress: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self::with_subscribe_timeout(url, correlator, ingress, Some(DEFAULT_SUBSCRIBE_TIMEOUT))
    }

    /// `None` waits for subscription replies indefinitely
    pub fn with_subscribe_timeout(
        url: impl Into<String>,
        correlator: Arc<RequestCorrelator<Value>>,
        ingress: mpsc::UnboundedSender<Value>,
        subscribe_timeout: Option<Duration>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                correlator,
                ingress,
                state,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                subscribe_timeout,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn state_handle(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
        metrics::set_connected(state == ConnectionState::Open);
    }

    /// Service the socket until it closes, fails, or `close` is called.
    ///
    /// There is no reconnection; a caller wanting one builds a new connection.
    pub async fn run(&self) -> Result<(), ConnectionError> {
        let mut outbound = self
            .shared
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ConnectionError::Connection("run() called twice".to_string()))?;

        if self.state().is_terminal() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        info!(url = %self.shared.url, "Connecting to Binance WebSocket");

        let mut ws = match connect_async(self.shared.url.as_str()).await {
            Ok((ws, response)) => {
                info!(status = ?response.status(), "Binance WebSocket connected");
                ws
            }
            Err(e) => {
                error!(error = %e, url = %self.shared.url, "Binance WebSocket connect failed");
                self.set_state(ConnectionState::Errored);
                return Err(e.into());
            }
        };

        self.set_state(ConnectionState::Open);

        let result = loop {
            tokio::select! {
                cmd = outbound.recv() => {
                    match cmd {
                        Some(Outbound::Text(text)) => {
                            trace!(msg = %text, "Sending frame");
                            if let Err(e) = ws.send(Message::Text(text)).await {
                                break Err(e);
                            }
                        }
                        Some(Outbound::Close) | None => {
                            info!("Closing Binance WebSocket");
                            if let Err(e) = ws.close(None).await {
                                warn!(error = %e, "Error sending close frame");
                            }
                            break Ok(());
                        }
                    }
                }

                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.route_text(&text),
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.route_text(text),
                            Err(e) => {
                                warn!(error = %e, "Dropping non-UTF-8 binary frame");
                                metrics::inc_message("undecodable");
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            trace!("Received ping, sending pong");
                            if let Err(e) = ws.send(Message::Pong(data)).await {
                                break Err(e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "Binance WebSocket closed by server");
                            break Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break Err(e),
                        None => {
                            info!("Binance WebSocket stream ended");
                            break Ok(());
                        }
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Closed);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Binance WebSocket error");
                self.set_state(ConnectionState::Errored);
                Err(e.into())
            }
        }
    }

    /// Ask the run loop to close the socket
    pub fn close(&self) {
        if self.state() == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Closed);
        }
        // Nobody listening means the run loop already exited
        let _ = self.shared.outbound_tx.send(Outbound::Close);
    }

    /// Demultiplex one inbound frame
    pub(crate) fn route_text(&self, text: &str) {
        let record: Value = match serde_json::from_str(text) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, raw = %text, "Failed to decode message");
                metrics::inc_message("undecodable");
                return;
            }
        };

        match reply_id(&record) {
            Some(id) => {
                metrics::inc_message("reply");
                debug!(id, reply = %record, "Received control reply");
                if let Err(e) = self.shared.correlator.set_response(id, record) {
                    warn!(error = %e, "Dropping stale or duplicate reply");
                    metrics::inc_message("stale_reply");
                }
            }
            None => {
                metrics::inc_message("market");
                if self.shared.ingress.send(record).is_err() {
                    debug!("Ingress queue closed, dropping market data");
                }
            }
        }
    }

    async fn wait_open(&self) -> Result<(), ConnectionError> {
        let mut state = self.state_handle();
        let reached = state
            .wait_for(|s| *s == ConnectionState::Open || s.is_terminal())
            .await
            .map(|s| *s)
            .map_err(|_| ConnectionError::NotOpen)?;

        if reached == ConnectionState::Open {
            Ok(())
        } else {
            Err(ConnectionError::NotOpen)
        }
    }

    async fn wait_terminal(&self) {
        let mut state = self.state_handle();
        // The sender lives in `shared`, so this only returns on a terminal state
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    /// Subscribe to `topics` and wait for the exchange's reply.
    ///
    /// Waits for the connection to open first. Fails with `NotOpen` if it
    /// closes or errors instead, either before the command is sent or while
    /// the reply is outstanding.
    pub async fn subscribe(&self, topics: Vec<String>) -> Result<Value, ConnectionError> {
        self.wait_open().await?;

        let id = self.shared.correlator.issue();
        let cmd = serde_json::to_string(&StreamCommand::subscribe(topics, id))?;
        debug!(cmd = %cmd, "Sending subscribe command");

        self.shared
            .outbound_tx
            .send(Outbound::Text(cmd))
            .map_err(|_| ConnectionError::NotOpen)?;

        let reply = tokio::select! {
            reply = self.shared.correlator.wait(id, self.shared.subscribe_timeout) => {
                reply?.ok_or(ConnectionError::SubscribeTimeout(id))?
            }
            _ = self.wait_terminal() => {
                warn!(id, state = ?self.state(), "Connection ended before subscription reply");
                return Err(ConnectionError::NotOpen);
            }
        };

        if let Some(err) = reply.get("error") {
            warn!(id, error = %err, "Subscription rejected");
            return Err(ConnectionError::SubscriptionFailed(err.to_string()));
        }

        info!(id, reply = %reply, "Subscription confirmed");
        Ok(reply)
    }

    /// Subscribe to aggregate trades for one symbol
    pub async fn subscribe_agg_trades(&self, symbol: &str) -> Result<Value, ConnectionError> {
        self.subscribe(vec![agg_trade_topic(symbol)]).await
    }
}
