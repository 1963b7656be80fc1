//! Media frame header with zero-copy parsing.
//!
//! The [`MediaFrameHeader`] is a fixed 56-byte structure prefixed to every
//! UDP video fragment. It travels in the clear: the receiver routes, admits,
//! and CRC-checks fragments before paying for AEAD decryption, and the
//! nonce-contributing fields (stream, sequence, fragment index, epoch) are
//! read straight from the header. All multi-byte integers are little-endian.
//!
//! Fields are stored as raw byte arrays to avoid alignment issues; accessors
//! convert at the call site.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fragment-level flags carried in the header.
///
/// Stored as a little-endian u16 bitfield. Unknown bits are preserved on
/// round-trip so older receivers stay compatible with newer senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags(u16);

impl MediaFlags {
    /// Fragment belongs to a keyframe.
    pub const KEYFRAME: Self = Self(1 << 0);
    /// Fragment is the last of its frame.
    pub const END_OF_FRAME: Self = Self(1 << 1);
    /// Sender state was reset; receiver must flush and await a keyframe.
    pub const DISCONTINUITY: Self = Self(1 << 2);
    /// Fragment carries FEC parity, not frame data.
    pub const PARITY: Self = Self(1 << 3);

    /// Datagram carries an audio packet ([`crate::audio::AudioPacketHeader`]).
    ///
    /// Every datagram kind leads with this flags word, so receivers demux
    /// on bytes 0-1 before parsing the kind-specific header.
    pub const KIND_AUDIO: Self = Self(1 << 15);
    /// Datagram carries a probe packet ([`crate::probe::ProbePacketHeader`]).
    pub const KIND_PROBE: Self = Self(1 << 14);

    /// Empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bitfield value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Reconstruct from a raw bitfield, keeping unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Subregion of the encoded frame buffer containing non-padded pixels,
/// in scaled-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContentRect {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl ContentRect {
    /// Serialize as 16 little-endian bytes (x, y, width, height).
    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out
    }

    /// Parse from 16 little-endian bytes.
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        // INVARIANT: the four 4-byte slices below cover exactly bytes[0..16].
        #[allow(clippy::unwrap_used)]
        let component = |range: std::ops::Range<usize>| {
            f32::from_le_bytes(bytes[range].try_into().unwrap())
        };
        Self {
            x: component(0..4),
            y: component(4..8),
            width: component(8..12),
            height: component(12..16),
        }
    }
}

/// Fixed 56-byte media frame header (little-endian).
///
/// Layout on the wire (byte offsets):
///
/// ```text
///  0..2   flags            u16   keyframe / end-of-frame / discontinuity / parity
///  2..4   stream_id        u16   unique per (host, session)
///  4..8   sequence_number  u32   per-stream packet counter
///  8..16  timestamp_ns     u64   monotonic presentation time
/// 16..20  frame_number     u32   monotonic per stream
/// 20..22  fragment_index   u16   < fragment_count
/// 22..24  fragment_count   u16   >= 1
/// 24..28  payload_length   u32   plaintext bytes in THIS fragment
/// 28..32  frame_byte_count u32   total plaintext bytes of the frame
/// 32..36  checksum         u32   CRC32 of this fragment's plaintext payload
/// 36..52  content_rect     4xf32 non-padded pixel region
/// 52..54  dimension_token  u16   bound to the encoded resolution
/// 54..56  epoch            u16   bumped on hard recovery
/// ```
///
/// # Invariants
///
/// - `fragment_index < fragment_count` (enforced by [`Self::from_bytes`]).
/// - The sum of `payload_length` over a frame's fragments equals
///   `frame_byte_count` (enforced by the reassembler on completion).
/// - `checksum` covers the *fragment* plaintext, not the whole frame.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits means any 56-byte
/// pattern is a structurally valid cast, so parsing untrusted datagrams
/// cannot cause undefined behavior. The header is NOT authenticated on its
/// own: it feeds the AEAD nonce, so tampering with any nonce-contributing
/// field makes the payload fail to open.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MediaFrameHeader {
    flags: [u8; 2],
    stream_id: [u8; 2],
    sequence_number: [u8; 4],
    timestamp_ns: [u8; 8],
    frame_number: [u8; 4],
    fragment_index: [u8; 2],
    fragment_count: [u8; 2],
    payload_length: [u8; 4],
    frame_byte_count: [u8; 4],
    checksum: [u8; 4],
    content_rect: [u8; 16],
    dimension_token: [u8; 2],
    epoch: [u8; 2],
}

impl MediaFrameHeader {
    /// Size of the serialized header (56 bytes).
    pub const SIZE: usize = 56;

    /// Maximum plaintext bytes a single fragment may declare.
    ///
    /// Generously above any sane `max_packet_size`; the bound exists so a
    /// forged header cannot make the receiver reserve absurd buffers.
    pub const MAX_FRAGMENT_PAYLOAD: u32 = 64 * 1024;

    /// Create a header for `stream_id` with a single fragment and all other
    /// fields zeroed.
    #[must_use]
    pub fn new(stream_id: u16) -> Self {
        Self {
            flags: [0; 2],
            stream_id: stream_id.to_le_bytes(),
            sequence_number: [0; 4],
            timestamp_ns: [0; 8],
            frame_number: [0; 4],
            fragment_index: [0; 2],
            fragment_count: 1u16.to_le_bytes(),
            payload_length: [0; 4],
            frame_byte_count: [0; 4],
            checksum: [0; 4],
            content_rect: [0; 16],
            dimension_token: [0; 2],
            epoch: [0; 2],
        }
    }

    /// Parse a header from the front of a datagram (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderTooShort`] if fewer than 56 bytes
    /// - [`ProtocolError::FragmentIndexOutOfRange`] if `fragment_index >=
    ///   fragment_count` (covers `fragment_count == 0`)
    /// - [`ProtocolError::PayloadTooLarge`] if `payload_length` exceeds
    ///   [`Self::MAX_FRAGMENT_PAYLOAD`]
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        let index = u16::from_le_bytes(header.fragment_index);
        let count = u16::from_le_bytes(header.fragment_count);
        if index >= count {
            return Err(ProtocolError::FragmentIndexOutOfRange { index, count });
        }

        let payload_length = u32::from_le_bytes(header.payload_length);
        if payload_length > Self::MAX_FRAGMENT_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: Self::MAX_FRAGMENT_PAYLOAD as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to a fixed byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Fragment flags.
    #[must_use]
    pub fn flags(&self) -> MediaFlags {
        MediaFlags::from_bits(u16::from_le_bytes(self.flags))
    }

    /// Whether this fragment belongs to a keyframe.
    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        self.flags().contains(MediaFlags::KEYFRAME)
    }

    /// Stream identifier.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        u16::from_le_bytes(self.stream_id)
    }

    /// Per-stream packet sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        u32::from_le_bytes(self.sequence_number)
    }

    /// Monotonic presentation timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        u64::from_le_bytes(self.timestamp_ns)
    }

    /// Monotonic frame number within the stream.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        u32::from_le_bytes(self.frame_number)
    }

    /// Index of this fragment within its frame.
    #[must_use]
    pub fn fragment_index(&self) -> u16 {
        u16::from_le_bytes(self.fragment_index)
    }

    /// Total fragments of this frame.
    #[must_use]
    pub fn fragment_count(&self) -> u16 {
        u16::from_le_bytes(self.fragment_count)
    }

    /// Plaintext bytes carried by this fragment.
    #[must_use]
    pub fn payload_length(&self) -> u32 {
        u32::from_le_bytes(self.payload_length)
    }

    /// Total plaintext bytes of the whole frame.
    #[must_use]
    pub fn frame_byte_count(&self) -> u32 {
        u32::from_le_bytes(self.frame_byte_count)
    }

    /// CRC32 over this fragment's plaintext payload.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Non-padded pixel region of the frame.
    #[must_use]
    pub fn content_rect(&self) -> ContentRect {
        ContentRect::from_le_bytes(self.content_rect)
    }

    /// Resolution tag; P-frames with a stale token are dropped after resize.
    #[must_use]
    pub fn dimension_token(&self) -> u16 {
        u16::from_le_bytes(self.dimension_token)
    }

    /// Recovery epoch; bumped on hard recovery.
    #[must_use]
    pub fn epoch(&self) -> u16 {
        u16::from_le_bytes(self.epoch)
    }

    /// Set fragment flags.
    pub fn set_flags(&mut self, flags: MediaFlags) {
        self.flags = flags.bits().to_le_bytes();
    }

    /// Set the stream identifier.
    pub fn set_stream_id(&mut self, stream_id: u16) {
        self.stream_id = stream_id.to_le_bytes();
    }

    /// Set the packet sequence number.
    pub fn set_sequence_number(&mut self, sequence: u32) {
        self.sequence_number = sequence.to_le_bytes();
    }

    /// Set the presentation timestamp.
    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.timestamp_ns = timestamp_ns.to_le_bytes();
    }

    /// Set the frame number.
    pub fn set_frame_number(&mut self, frame_number: u32) {
        self.frame_number = frame_number.to_le_bytes();
    }

    /// Set fragment index and count together.
    ///
    /// Joint setter because the pair carries the `index < count` invariant;
    /// callers cannot produce a half-updated header.
    pub fn set_fragmentation(&mut self, index: u16, count: u16) {
        debug_assert!(index < count, "fragment index must be below count");
        self.fragment_index = index.to_le_bytes();
        self.fragment_count = count.to_le_bytes();
    }

    /// Set this fragment's plaintext length.
    pub fn set_payload_length(&mut self, length: u32) {
        self.payload_length = length.to_le_bytes();
    }

    /// Set the whole frame's plaintext length.
    pub fn set_frame_byte_count(&mut self, count: u32) {
        self.frame_byte_count = count.to_le_bytes();
    }

    /// Set the fragment payload checksum.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }

    /// Set the content rect.
    pub fn set_content_rect(&mut self, rect: ContentRect) {
        self.content_rect = rect.to_le_bytes();
    }

    /// Set the dimension token.
    pub fn set_dimension_token(&mut self, token: u16) {
        self.dimension_token = token.to_le_bytes();
    }

    /// Set the recovery epoch.
    pub fn set_epoch(&mut self, epoch: u16) {
        self.epoch = epoch.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for MediaFrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFrameHeader")
            .field("flags", &self.flags())
            .field("stream_id", &self.stream_id())
            .field("sequence_number", &self.sequence_number())
            .field("timestamp_ns", &self.timestamp_ns())
            .field("frame_number", &self.frame_number())
            .field("fragment_index", &self.fragment_index())
            .field("fragment_count", &self.fragment_count())
            .field("payload_length", &self.payload_length())
            .field("frame_byte_count", &self.frame_byte_count())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .field("dimension_token", &self.dimension_token())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for MediaFrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for MediaFrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for MediaFrameHeader {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (
                any::<u16>(),                          // flags
                any::<u16>(),                          // stream_id
                any::<u32>(),                          // sequence_number
                any::<u64>(),                          // timestamp_ns
                any::<u32>(),                          // frame_number
                (1u16..=64).prop_flat_map(|count| (0..count, Just(count))),
                0u32..=MediaFrameHeader::MAX_FRAGMENT_PAYLOAD,
                any::<u32>(),                          // frame_byte_count
                any::<u32>(),                          // checksum
                any::<u16>(),                          // dimension_token
                any::<u16>(),                          // epoch
            )
                .prop_map(
                    |(
                        flags,
                        stream_id,
                        sequence,
                        timestamp,
                        frame_number,
                        (index, count),
                        payload_length,
                        frame_bytes,
                        checksum,
                        token,
                        epoch,
                    )| {
                        let mut header = Self::new(stream_id);
                        header.set_flags(MediaFlags::from_bits(flags));
                        header.set_sequence_number(sequence);
                        header.set_timestamp_ns(timestamp);
                        header.set_frame_number(frame_number);
                        header.set_fragmentation(index, count);
                        header.set_payload_length(payload_length);
                        header.set_frame_byte_count(frame_bytes);
                        header.set_checksum(checksum);
                        header.set_dimension_token(token);
                        header.set_epoch(epoch);
                        header
                    },
                )
                .boxed()
        }
    }

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<MediaFrameHeader>(), MediaFrameHeader::SIZE);
        assert_eq!(MediaFrameHeader::SIZE, 56);
    }

    #[test]
    fn spec_header_round_trip() {
        let mut header = MediaFrameHeader::new(1);
        header.set_flags(MediaFlags::KEYFRAME.union(MediaFlags::END_OF_FRAME));
        header.set_sequence_number(100);
        header.set_timestamp_ns(123_456_789);
        header.set_frame_number(50);
        header.set_fragmentation(0, 1);
        header.set_payload_length(1024);
        header.set_frame_byte_count(1024);
        header.set_checksum(0xDEAD_BEEF);

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), MediaFrameHeader::SIZE);

        let parsed = MediaFrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(&header, parsed);
        assert!(parsed.is_keyframe());
        assert!(parsed.flags().contains(MediaFlags::END_OF_FRAME));
        assert_eq!(parsed.checksum(), 0xDEAD_BEEF);
        assert_eq!(parsed.epoch(), 0);
        assert_eq!(parsed.dimension_token(), 0);
    }

    #[test]
    fn reject_short_buffer() {
        let short = [0u8; 20];
        assert_eq!(
            MediaFrameHeader::from_bytes(&short),
            Err(ProtocolError::HeaderTooShort { expected: 56, actual: 20 })
        );
    }

    #[test]
    fn reject_fragment_index_at_count() {
        let mut header = MediaFrameHeader::new(1);
        // Bypass the joint setter to forge index == count on the wire.
        let mut bytes = header.to_bytes();
        bytes[20..22].copy_from_slice(&3u16.to_le_bytes());
        bytes[22..24].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(
            MediaFrameHeader::from_bytes(&bytes),
            Err(ProtocolError::FragmentIndexOutOfRange { index: 3, count: 3 })
        );

        // Zero fragment count is rejected the same way.
        header.set_payload_length(0);
        let mut bytes = header.to_bytes();
        bytes[22..24].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(
            MediaFrameHeader::from_bytes(&bytes),
            Err(ProtocolError::FragmentIndexOutOfRange { count: 0, .. })
        ));
    }

    #[test]
    fn reject_oversized_fragment_payload() {
        let header = MediaFrameHeader::new(1);
        let mut bytes = header.to_bytes();
        bytes[24..28]
            .copy_from_slice(&(MediaFrameHeader::MAX_FRAGMENT_PAYLOAD + 1).to_le_bytes());
        assert!(matches!(
            MediaFrameHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn content_rect_round_trip() {
        let rect = ContentRect { x: 0.0, y: 2.0, width: 2560.0, height: 1417.5 };
        let mut header = MediaFrameHeader::new(7);
        header.set_content_rect(rect);
        let parsed = MediaFrameHeader::from_bytes(&header.to_bytes()).unwrap().content_rect();
        assert_eq!(parsed, rect);
    }

    #[test]
    fn little_endian_layout() {
        let mut header = MediaFrameHeader::new(0x0102);
        header.set_sequence_number(0x0304_0506);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x06, 0x05, 0x04, 0x03]);
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<MediaFrameHeader>()) {
            let bytes = header.to_bytes();
            let parsed = MediaFrameHeader::from_bytes(&bytes).unwrap();
            prop_assert_eq!(&header, parsed);
        }

        #[test]
        fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = MediaFrameHeader::from_bytes(&bytes);
        }
    }
}
