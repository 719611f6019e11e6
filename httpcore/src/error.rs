use thiserror::Error;

/// Shared error taxonomy. Every crate in the workspace converts its
/// local `thiserror` enum into this one at its public boundary, the way the
/// teacher's services convert `DbError`/`SessionError` into their own
/// top-level error at the boundary they're consumed from.
#[derive(Debug, Error, Clone)]
pub enum TurboError {
    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unsupported transfer-encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("flow control violation: {0}")]
    FlowControl(String),

    #[error("server sent GOAWAY: {0}")]
    GoAway(String),

    #[error("proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("proxy tunnel failed: {0}")]
    ProxyTunnelFailed(String),

    #[error("proxy authentication required")]
    ProxyAuthenticationRequired,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cache error: {0:?}")]
    Cache(CacheErrorKind),

    #[error("websocket error: {0:?}")]
    WebSocket(WebSocketErrorKind),
}

impl TurboError {
    /// Whether the transport is permitted to retry this request on a fresh
    /// connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TurboError::Network(_) | TurboError::Timeout | TurboError::GoAway(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheErrorKind {
    StorageFull,
    Corrupt,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketErrorKind {
    ConnectionClosed,
    ProtocolViolation,
    InvalidCloseCode,
    InvalidUtf8,
    ExtensionNegotiationFailed,
    MaskedServerFrame,
    ReservedOpcode,
    DecompressedMessageTooLarge,
    SerializationFailed,
}

pub type TurboResult<T> = Result<T, TurboError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_timeout_and_goaway_are_retryable() {
        assert!(TurboError::Network("x".into()).is_retryable());
        assert!(TurboError::Timeout.is_retryable());
        assert!(TurboError::GoAway("last=7".into()).is_retryable());
    }

    #[test]
    fn protocol_and_tls_errors_are_not_retryable_by_default() {
        assert!(!TurboError::Protocol("bad frame".into()).is_retryable());
        assert!(!TurboError::Tls("cert".into()).is_retryable());
    }
}
