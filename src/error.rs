//! Error types for the realtime voice client.

use thiserror::Error;

/// Errors that can occur during a voice session.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Microphone access was refused. Fatal to capture, not to the session.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input or output device.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection failed or dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound message. The message is dropped, the connection stays up.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed audio payload.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Error reported by the remote service over the session channel.
    #[error("server error: {0}")]
    Server(String),

    /// Operation requires an open transport.
    #[error("not connected")]
    NotConnected,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for voice client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::Transport("connection refused".to_string());
        assert!(err.to_string().contains("transport error"));

        let err = ClientError::NotConnected;
        assert_eq!(err.to_string(), "not connected");
    }

    #[test]
    fn test_decode_error_display() {
        let err = ClientError::Decode("odd byte count".to_string());
        assert!(err.to_string().contains("audio decode error"));
    }
}
