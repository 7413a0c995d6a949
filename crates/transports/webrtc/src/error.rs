//! Error types for call negotiation

/// Result type alias using the negotiation Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local capture devices unavailable or denied
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Signaling message could not be handled
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Media state store failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Relay channel error
    #[error("Relay error: {0}")]
    Relay(#[from] pairlink_core::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::PeerConnectionError(_) | Error::IoError(_) => true,
            Error::Relay(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error comes from the negotiation itself
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_) | Error::IceCandidateError(_) | Error::SignalingError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MediaAcquisition("permission denied".to_string());
        assert_eq!(err.to_string(), "Media acquisition failed: permission denied");
    }

    #[test]
    fn test_error_categories() {
        assert!(Error::SdpError("bad".to_string()).is_negotiation_error());
        assert!(Error::InvalidConfig("bad".to_string()).is_config_error());
        assert!(!Error::StoreError("bad".to_string()).is_retryable());

        let relay = Error::from(pairlink_core::Error::ConnectionFailed("refused".to_string()));
        assert!(relay.is_retryable());
    }
}
