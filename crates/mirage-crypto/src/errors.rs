//! Error types for identity, handshake, and media-path cryptography.

use thiserror::Error;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors from signing, verification, derivation, and AEAD operations.
///
/// [`CryptoError::DecryptFailed`] deliberately carries no detail: on the
/// media path the receiver drops the packet and bumps a counter, and
/// distinguishing tag failure from truncation would only help an attacker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Peer public key bytes are not a valid P-256 point.
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// Signature bytes are not valid DER ECDSA.
    #[error("malformed signature encoding")]
    InvalidSignature,

    /// Signature did not verify over the canonical payload.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Hello timestamp outside the acceptance window.
    #[error("timestamp skew {skew_ms} ms exceeds limit {limit_ms} ms")]
    TimestampSkew {
        /// Absolute skew observed.
        skew_ms: u64,
        /// Configured acceptance window.
        limit_ms: u64,
    },

    /// Hello nonce was seen recently.
    #[error("nonce replayed")]
    NonceReplayed,

    /// AEAD open failed (truncated, tampered, or wrong nonce inputs).
    #[error("packet decryption failed")]
    DecryptFailed,

    /// HKDF output length invalid or embedded structure unserializable.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}
