//! Error types for the protocol core.
//!
//! Strongly-typed errors per subsystem. Media-path admission failures are
//! not represented here at all: the reassembler and AEAD layer drop bad
//! packets silently and bump counters, because a lossy network produces
//! them continuously and error bubbles would only add latency.

use std::time::Duration;

use thiserror::Error;

/// Errors from stream lifecycle operations on the host.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Stream identifier is not active.
    #[error("unknown stream {0}")]
    UnknownStream(u16),

    /// All 16-bit stream identifiers are in use.
    #[error("stream identifier space exhausted")]
    StreamIdsExhausted,

    /// `stream_scale` is fixed at session start; mid-session changes are
    /// rejected rather than guessed at.
    #[error("stream scale is locked for the session")]
    ScaleLocked,

    /// Encoder rejected a reconfiguration.
    #[error("encoder configuration rejected: {0}")]
    EncoderConfig(String),

    /// Configured packet size cannot hold a header plus any payload.
    #[error("max packet size {size} below minimum {min}")]
    PacketSizeTooSmall {
        /// Configured size.
        size: usize,
        /// Smallest usable size.
        min: usize,
    },
}

/// Errors from the shared virtual display manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// Platform display creation failed at both HiDPI factors.
    #[error("display creation failed: {0}")]
    CreationFailed(String),

    /// Created display never validated against the platform display API.
    #[error("display ready-check failed for mode {width}x{height}")]
    ReadyCheckFailed {
        /// Expected logical width.
        width: u32,
        /// Expected logical height.
        height: u32,
    },

    /// Space lookup for the display failed.
    #[error("space lookup failed for display {0}")]
    SpaceLookupFailed(u64),

    /// Release was called by a consumer that never acquired.
    #[error("consumer is not active")]
    UnknownConsumer,
}

/// Errors from the signed handshake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Hello/response arrived in the wrong state.
    #[error("unexpected handshake message in state {state}")]
    InvalidState {
        /// State name when the message arrived.
        state: &'static str,
    },

    /// Second hello on the same connection.
    #[error("duplicate hello on connection")]
    DuplicateHello,

    /// Response did not echo the hello nonce.
    #[error("response nonce does not match request")]
    NonceMismatch,

    /// Peer speaks an unsupported protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// Host rejected the hello.
    #[error("hello rejected with reason code {0}")]
    Rejected(u32),

    /// No response within the handshake deadline.
    #[error("handshake timeout after {elapsed:?}")]
    Timeout {
        /// Time waited.
        elapsed: Duration,
    },

    /// A nonce or key field was not valid hex/Base64.
    #[error("malformed handshake field: {0}")]
    MalformedField(&'static str),

    /// Signature, replay, or derivation failure from the crypto layer.
    #[error(transparent)]
    Crypto(#[from] mirage_crypto::CryptoError),
}

impl HandshakeError {
    /// Whether retrying the handshake on a fresh connection may succeed.
    ///
    /// Timeouts are transient. Signature and protocol failures indicate a
    /// broken or hostile peer and are not retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
