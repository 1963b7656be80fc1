//! Client transport errors.

use thiserror::Error;

/// Errors from connecting and running a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP or UDP connection setup failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The signed handshake failed.
    #[error(transparent)]
    Handshake(#[from] mirage_core::HandshakeError),

    /// Stream-level I/O failure after establishment.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer violated control-channel framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session tasks are gone (stop() or disconnect already happened).
    #[error("session closed")]
    Closed,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<mirage_proto::ProtocolError> for ClientError {
    fn from(err: mirage_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
