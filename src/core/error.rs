use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Registration protocol violation: sent {expected} metrics, got {actual} results")]
    ProtocolViolation { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload rejected: {0}")]
    Upload(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Upload queue closed")]
    QueueClosed,
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new upload error
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload(msg.into())
    }

    /// Returns true if the failure only affects the current request and the
    /// connection should be discarded and re-established on the next call.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Network(_) | Self::Io(_))
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ProtocolViolation { .. } => "protocol",
            Self::Config(_) => "config",
            Self::Upload(_) => "upload",
            Self::Network(_) | Self::Http(_) => "network",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::QueueClosed => "queue",
        }
    }
}
