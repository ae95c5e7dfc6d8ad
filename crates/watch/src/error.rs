use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("no outstanding request for id {0}")]
    UnknownRequest(u64),
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection is not open")]
    NotOpen,

    #[error("no reply to request {0} before timeout")]
    SubscribeTimeout(u64),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("correlation error: {0}")]
    Correlator(#[from] CorrelatorError),
}

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl PreprocessError {
    /// Metric label for this failure
    pub fn kind(&self) -> &'static str {
        match self {
            PreprocessError::InvalidNumber { .. } => "invalid_number",
            PreprocessError::Malformed(_) => "malformed",
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error: {0}")]
    Api(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
