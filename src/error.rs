use std::time::Duration;

use thiserror::Error;

/// Classifies control-plane transport errors for programmatic matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Channel could not be established
    ConnectionFailed,
    /// The bidirectional stream was rejected or broke mid-flight
    StreamFailed,
    /// TLS material could not be loaded or was rejected
    Tls,
    /// Credential (bearer token) missing or malformed
    Auth,
    /// Outbound request channel closed
    Closed,
}

/// xDS client and authorization engine errors
#[derive(Error, Debug)]
pub enum XdsError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Transport error: {message}")]
    TransportError {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("No resources synchronized from control plane within {0:?}")]
    BootstrapTimeout(Duration),

    #[error("Discovery client shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    ProtoError(#[from] prost::DecodeError),
}

impl XdsError {
    pub(crate) fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        XdsError::TransportError {
            kind,
            message: message.into(),
        }
    }

    /// Whether the dispatch loop should reconnect after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            XdsError::TransportError {
                kind: TransportErrorKind::ConnectionFailed
                    | TransportErrorKind::StreamFailed
                    | TransportErrorKind::Closed,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, XdsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_kind_is_matchable() {
        let err = XdsError::transport(TransportErrorKind::StreamFailed, "stream reset");
        match &err {
            XdsError::TransportError { kind, .. } => {
                assert!(matches!(kind, TransportErrorKind::StreamFailed));
            }
            _ => panic!("expected TransportError"),
        }
    }

    #[test]
    fn test_transport_error_display_includes_message() {
        let err = XdsError::transport(TransportErrorKind::ConnectionFailed, "connection refused");
        let display = format!("{}", err);
        assert!(display.contains("connection refused"), "got: {}", display);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(XdsError::transport(TransportErrorKind::StreamFailed, "x").is_retryable());
        assert!(XdsError::transport(TransportErrorKind::Closed, "x").is_retryable());
        assert!(!XdsError::transport(TransportErrorKind::Auth, "x").is_retryable());
        assert!(!XdsError::ConfigError("no token".into()).is_retryable());
        assert!(!XdsError::BootstrapTimeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn test_bootstrap_timeout_display() {
        let err = XdsError::BootstrapTimeout(Duration::from_secs(30));
        assert!(format!("{}", err).contains("30s"));
    }
}
