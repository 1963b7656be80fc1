//! Error types for wire-format parsing and encoding.

use thiserror::Error;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire structures.
///
/// Media-path admission failures (stale epoch, CRC mismatch, ...) are NOT
/// errors: the reassembler drops those packets silently and bumps counters.
/// This enum covers structural problems only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed header size.
    #[error("buffer too short for header: expected {expected} bytes, got {actual}")]
    HeaderTooShort {
        /// Required byte count.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Envelope magic did not match.
    #[error("invalid control envelope magic: {0:#010x}")]
    InvalidMagic(u32),

    /// Fragment index is not below the fragment count.
    #[error("fragment index {index} out of range for count {count}")]
    FragmentIndexOutOfRange {
        /// Offending index.
        index: u16,
        /// Declared fragment count.
        count: u16,
    },

    /// Declared payload length exceeds the protocol maximum.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Envelope declared more payload bytes than the buffer holds.
    #[error("envelope truncated: expected {expected} payload bytes, got {actual}")]
    EnvelopeTruncated {
        /// Declared payload length.
        expected: usize,
        /// Bytes available after the envelope header.
        actual: usize,
    },

    /// Envelope type is not recognized by this build.
    ///
    /// Receivers skip these (forward compatibility); the error exists so the
    /// skip site can log what it ignored.
    #[error("unknown control message type: {0:#06x}")]
    UnknownType(u16),

    /// JSON serialization failed.
    #[error("JSON encode failed: {0}")]
    JsonEncode(String),

    /// JSON deserialization failed.
    #[error("JSON decode failed: {0}")]
    JsonDecode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = ProtocolError::HeaderTooShort { expected: 56, actual: 12 };
        assert!(err.to_string().contains("56"));
        assert!(err.to_string().contains("12"));

        let err = ProtocolError::UnknownType(0x0099);
        assert!(err.to_string().contains("0x0099"));
    }
}
