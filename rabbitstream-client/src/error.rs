//! Client error types.

use rabbitstream_protocol::{ProtocolError, ResponseCode};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("no inbound frame within two heartbeat intervals")]
    HeartbeatTimeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("broker error: {0}")]
    Server(ResponseCode),

    #[error("unexpected response with key {key:#06x}")]
    UnexpectedResponse { key: u16 },
}

impl ClientError {
    /// Returns whether retrying the operation on a fresh connection could
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_)
            | ClientError::Connect { .. }
            | ClientError::ConnectionClosed
            | ClientError::Timeout
            | ClientError::HeartbeatTimeout => true,
            ClientError::Server(code) => matches!(
                code,
                ResponseCode::StreamNotAvailable | ResponseCode::InternalError
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::HeartbeatTimeout.is_retryable());
        assert!(ClientError::Server(ResponseCode::StreamNotAvailable).is_retryable());

        assert!(!ClientError::Server(ResponseCode::AuthenticationFailure).is_retryable());
        assert!(!ClientError::TlsConfig("bad cert".into()).is_retryable());
        assert!(!ClientError::UnexpectedResponse { key: 0x8001 }.is_retryable());
    }

    #[test]
    fn connect_error_names_the_endpoint() {
        let err = ClientError::Connect {
            host: "broker.internal".into(),
            port: 5552,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let text = err.to_string();
        assert!(text.contains("broker.internal:5552"));
    }
}
