//! Length-prefixed control channel envelopes.
//!
//! The TCP control stream carries a sequence of envelopes:
//!
//! ```text
//! magic(u32 = 0x4D524147 "MRAG") | type(u16) | reserved(u16) |
//! length(u32) | payload[length]
//! ```
//!
//! Envelope framing fields are big-endian (network order); the payload is
//! sorted-key JSON. Multiple envelopes may arrive in one read, and one
//! envelope may span reads, so receivers run a [`EnvelopeDecoder`] over an
//! accumulating buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// A framed control message.
///
/// Holds the raw type value rather than [`crate::ControlMessageType`] so that
/// unknown types survive framing and can be skipped (with a log line) at the
/// dispatch layer instead of poisoning the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEnvelope {
    /// Wire value of the message type.
    pub message_type: u16,
    /// Raw JSON payload bytes.
    pub payload: Bytes,
}

impl ControlEnvelope {
    /// Envelope framing magic, ASCII "MRAG".
    pub const MAGIC: u32 = 0x4D52_4147;

    /// Framing header size preceding the payload (12 bytes).
    pub const HEADER_SIZE: usize = 12;

    /// Maximum payload size.
    ///
    /// Window lists with previews are the largest legitimate message; 4 MiB
    /// bounds a hostile length field without constraining them.
    pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

    /// Create an envelope from a type value and payload bytes.
    #[must_use]
    pub fn new(message_type: u16, payload: impl Into<Bytes>) -> Self {
        Self { message_type, payload: payload.into() }
    }

    /// Encode into a buffer: framing header followed by payload.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] above [`Self::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_u32(Self::MAGIC);
        dst.put_u16(self.message_type);
        dst.put_u16(0); // reserved
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encoded size of this envelope.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }
}

/// Incremental envelope extractor over a TCP receive buffer.
///
/// Feed raw reads with [`Self::extend`]; pull complete envelopes with
/// [`Self::next_envelope`] until it returns `Ok(None)`. Framing errors
/// (bad magic, oversized length) are unrecoverable for the stream: the
/// connection should be torn down, since byte alignment is lost.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    buf: BytesMut,
}

impl EnvelopeDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(16 * 1024) }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered and not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete envelope, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidMagic`] if the stream is misaligned
    /// - [`ProtocolError::PayloadTooLarge`] on a hostile length field
    pub fn next_envelope(&mut self) -> Result<Option<ControlEnvelope>> {
        if self.buf.len() < ControlEnvelope::HEADER_SIZE {
            return Ok(None);
        }

        let magic = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if magic != ControlEnvelope::MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let message_type = u16::from_be_bytes([self.buf[4], self.buf[5]]);
        let length = u32::from_be_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]]);
        if length > ControlEnvelope::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: length as usize,
                max: ControlEnvelope::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let total = ControlEnvelope::HEADER_SIZE + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(ControlEnvelope::HEADER_SIZE);
        let payload = self.buf.split_to(length as usize).freeze();
        Ok(Some(ControlEnvelope { message_type, payload }))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode(env: &ControlEnvelope) -> Vec<u8> {
        let mut buf = Vec::new();
        env.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn single_envelope_round_trip() {
        let env = ControlEnvelope::new(0x0003, Bytes::new());
        let wire = encode(&env);
        assert_eq!(wire.len(), ControlEnvelope::HEADER_SIZE);

        let mut decoder = EnvelopeDecoder::new();
        decoder.extend(&wire);
        assert_eq!(decoder.next_envelope().unwrap(), Some(env));
        assert_eq!(decoder.next_envelope().unwrap(), None);
    }

    #[test]
    fn multiple_envelopes_in_one_read() {
        let a = ControlEnvelope::new(0x0001, &b"{\"x\":1}"[..]);
        let b = ControlEnvelope::new(0x0010, &b"{\"y\":2}"[..]);
        let mut wire = encode(&a);
        wire.extend_from_slice(&encode(&b));

        let mut decoder = EnvelopeDecoder::new();
        decoder.extend(&wire);
        assert_eq!(decoder.next_envelope().unwrap(), Some(a));
        assert_eq!(decoder.next_envelope().unwrap(), Some(b));
        assert_eq!(decoder.next_envelope().unwrap(), None);
    }

    #[test]
    fn envelope_spanning_reads() {
        let env = ControlEnvelope::new(0x0021, vec![0x7Bu8; 300]);
        let wire = encode(&env);

        let mut decoder = EnvelopeDecoder::new();
        for chunk in wire.chunks(7) {
            decoder.extend(chunk);
        }
        assert_eq!(decoder.next_envelope().unwrap(), Some(env));
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut decoder = EnvelopeDecoder::new();
        decoder.extend(&ControlEnvelope::MAGIC.to_be_bytes());
        assert_eq!(decoder.next_envelope().unwrap(), None);
        assert_eq!(decoder.buffered(), 4);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut decoder = EnvelopeDecoder::new();
        decoder.extend(&[0xFFu8; 16]);
        assert!(matches!(
            decoder.next_envelope(),
            Err(ProtocolError::InvalidMagic(0xFFFF_FFFF))
        ));
    }

    #[test]
    fn hostile_length_rejected_before_buffering() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&ControlEnvelope::MAGIC.to_be_bytes());
        wire.extend_from_slice(&0x0001u16.to_be_bytes());
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend_from_slice(&u32::MAX.to_be_bytes());

        let mut decoder = EnvelopeDecoder::new();
        decoder.extend(&wire);
        assert!(matches!(
            decoder.next_envelope(),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn oversized_payload_rejected_on_encode() {
        let env =
            ControlEnvelope::new(1, vec![0u8; ControlEnvelope::MAX_PAYLOAD_SIZE as usize + 1]);
        let mut buf = Vec::new();
        assert!(matches!(
            env.encode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_chunking(
            message_type in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..64,
        ) {
            let env = ControlEnvelope::new(message_type, payload);
            let wire = encode(&env);

            let mut decoder = EnvelopeDecoder::new();
            let mut out = Vec::new();
            for piece in wire.chunks(chunk) {
                decoder.extend(piece);
                while let Some(e) = decoder.next_envelope().unwrap() {
                    out.push(e);
                }
            }
            prop_assert_eq!(out, vec![env]);
        }
    }
}
