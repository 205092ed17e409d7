use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("not connected to the hub")]
    NotConnected,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::Closed)
    }
}
