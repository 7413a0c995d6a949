//! Error types for the relay channel

/// Result type alias using the relay channel Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the relay
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport was closed by either side
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Frame is not a JSON object with a string `type`
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should lead to another connection attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_)
                | Error::ConnectionClosed(_)
                | Error::OperationTimeout(_)
                | Error::WebSocketError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocketError(err.to_string())
    }
}
