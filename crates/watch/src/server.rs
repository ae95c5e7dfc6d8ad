use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::binance::ConnectionState;
use crate::metrics;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub symbols: Vec<String>,
    pub connection: ConnectionState,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub symbols: Vec<String>,
    pub connection: watch::Receiver<ConnectionState>,
}

impl ServerState {
    pub fn new(symbols: Vec<String>, connection: watch::Receiver<ConnectionState>) -> Self {
        Self {
            symbols,
            connection,
        }
    }

    fn current(&self) -> ConnectionState {
        *self.connection.borrow()
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        symbols: state.symbols.clone(),
        connection: state.current(),
    })
}

/// Ready endpoint - returns 200 only while the stream is open
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let connection = state.current();
    let open = connection == ConnectionState::Open;
    let status_code = if open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if open { "ready" } else { "not_ready" }.to_string(),
            symbols: state.symbols.clone(),
            connection,
        }),
    )
}

/// Prometheus text exposition
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
