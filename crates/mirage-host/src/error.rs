//! Host service errors.

use thiserror::Error;

/// Errors from binding and running the host service.
#[derive(Debug, Error)]
pub enum HostError {
    /// Socket setup failed.
    #[error("bind failed: {0}")]
    Bind(String),

    /// Handshake rejected or failed.
    #[error(transparent)]
    Handshake(#[from] mirage_core::HandshakeError),

    /// Stream lifecycle failure.
    #[error(transparent)]
    Stream(#[from] mirage_core::StreamError),

    /// Session identifier is not connected.
    #[error("unknown session {0}")]
    UnknownSession(u64),

    /// I/O failure after establishment.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service tasks are gone.
    #[error("host service closed")]
    Closed,
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<mirage_proto::ProtocolError> for HostError {
    fn from(err: mirage_proto::ProtocolError) -> Self {
        Self::Transport(err.to_string())
    }
}
