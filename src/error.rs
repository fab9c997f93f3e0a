//! Top-level error types for chatbridge.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// Errors surfaced by a platform client or session.
///
/// Authentication failures are fatal at startup; transport-level failures
/// are absorbed by the session's reconnect loop; not-found lookups cost the
/// single event that referenced them.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("{call} failed: {message}")]
    Api { call: String, message: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("event stream closed")]
    StreamClosed,

    #[error("liveness ack missed")]
    HeartbeatTimeout,

    #[error("unknown user: {0}")]
    UserNotFound(String),

    #[error("unknown channel: {0}")]
    ChannelNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
