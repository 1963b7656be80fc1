//! Audio packet header.
//!
//! Parallel to [`crate::MediaFrameHeader`] but carrying codec parameters
//! instead of video geometry. Audio frames are small enough that
//! `fragment_count` is almost always 1; the machinery exists so a future
//! high-bitrate codec can span datagrams without a wire change.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Audio codec identifier carried as a four-byte tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// Opus, the default interactive codec.
    Opus,
    /// AAC-LC passthrough.
    Aac,
    /// Uncompressed PCM (testing and loopback).
    Lpcm,
}

impl AudioCodec {
    /// Four-byte wire tag.
    #[must_use]
    pub const fn tag(self) -> [u8; 4] {
        match self {
            Self::Opus => *b"opus",
            Self::Aac => *b"aac ",
            Self::Lpcm => *b"lpcm",
        }
    }

    /// Parse a wire tag. `None` for unrecognized codecs.
    #[must_use]
    pub const fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"opus" => Some(Self::Opus),
            b"aac " => Some(Self::Aac),
            b"lpcm" => Some(Self::Lpcm),
            _ => None,
        }
    }
}

/// Fixed 44-byte audio packet header (little-endian).
///
/// Same sequence/frame/fragment/checksum machinery as the video header; the
/// geometry fields are replaced by codec parameters. The checksum covers this
/// fragment's plaintext payload.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AudioPacketHeader {
    flags: [u8; 2],
    stream_id: [u8; 2],
    codec_tag: [u8; 4],
    sample_rate: [u8; 4],
    channel_count: [u8; 2],
    samples_per_frame: [u8; 2],
    sequence_number: [u8; 4],
    frame_number: [u8; 4],
    fragment_index: [u8; 2],
    fragment_count: [u8; 2],
    payload_length: [u8; 4],
    checksum: [u8; 4],
    timestamp_ns: [u8; 8],
}

impl AudioPacketHeader {
    /// Size of the serialized header (44 bytes).
    pub const SIZE: usize = 44;

    /// Maximum plaintext bytes a single audio fragment may declare.
    pub const MAX_FRAGMENT_PAYLOAD: u32 = 16 * 1024;

    /// Create a header for one stream and codec configuration.
    #[must_use]
    pub fn new(
        stream_id: u16,
        codec: AudioCodec,
        sample_rate: u32,
        channel_count: u16,
        samples_per_frame: u16,
    ) -> Self {
        Self {
            flags: crate::MediaFlags::KIND_AUDIO.bits().to_le_bytes(),
            stream_id: stream_id.to_le_bytes(),
            codec_tag: codec.tag(),
            sample_rate: sample_rate.to_le_bytes(),
            channel_count: channel_count.to_le_bytes(),
            samples_per_frame: samples_per_frame.to_le_bytes(),
            sequence_number: [0; 4],
            frame_number: [0; 4],
            fragment_index: [0; 2],
            fragment_count: 1u16.to_le_bytes(),
            payload_length: [0; 4],
            checksum: [0; 4],
            timestamp_ns: [0; 8],
        }
    }

    /// Parse a header from the front of a datagram (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderTooShort`] if fewer than 44 bytes
    /// - [`ProtocolError::FragmentIndexOutOfRange`] on a bad fragment pair
    /// - [`ProtocolError::PayloadTooLarge`] above
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

    /// Packet flags; [`crate::MediaFlags::KIND_AUDIO`] is always set.
    #[must_use]
    pub fn flags(&self) -> crate::MediaFlags {
        crate::MediaFlags::from_bits(u16::from_le_bytes(self.flags))
    }

    /// Stream identifier.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        u16::from_le_bytes(self.stream_id)
    }

    /// Audio codec. `None` if the tag is unrecognized.
    #[must_use]
    pub fn codec(&self) -> Option<AudioCodec> {
        AudioCodec::from_tag(self.codec_tag)
    }

    /// Sample rate in Hz.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        u32::from_le_bytes(self.sample_rate)
    }

    /// Channel count.
    #[must_use]
    pub fn channel_count(&self) -> u16 {
        u16::from_le_bytes(self.channel_count)
    }

    /// PCM samples represented by one frame.
    #[must_use]
    pub fn samples_per_frame(&self) -> u16 {
        u16::from_le_bytes(self.samples_per_frame)
    }

    /// Per-stream packet sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u32 {
        u32::from_le_bytes(self.sequence_number)
    }

    /// Monotonic frame number.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        u32::from_le_bytes(self.frame_number)
    }

    /// Fragment index within the frame.
    #[must_use]
    pub fn fragment_index(&self) -> u16 {
        u16::from_le_bytes(self.fragment_index)
    }

    /// Total fragments of the frame.
    #[must_use]
    pub fn fragment_count(&self) -> u16 {
        u16::from_le_bytes(self.fragment_count)
    }

    /// Plaintext bytes carried by this fragment.
    #[must_use]
    pub fn payload_length(&self) -> u32 {
        u32::from_le_bytes(self.payload_length)
    }

    /// CRC32 over this fragment's plaintext payload.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Presentation timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        u64::from_le_bytes(self.timestamp_ns)
    }

    /// Set the packet sequence number.
    pub fn set_sequence_number(&mut self, sequence: u32) {
        self.sequence_number = sequence.to_le_bytes();
    }

    /// Set the frame number.
    pub fn set_frame_number(&mut self, frame_number: u32) {
        self.frame_number = frame_number.to_le_bytes();
    }

    /// Set fragment index and count together.
    pub fn set_fragmentation(&mut self, index: u16, count: u16) {
        debug_assert!(index < count, "fragment index must be below count");
        self.fragment_index = index.to_le_bytes();
        self.fragment_count = count.to_le_bytes();
    }

    /// Set this fragment's plaintext length.
    pub fn set_payload_length(&mut self, length: u32) {
        self.payload_length = length.to_le_bytes();
    }

    /// Set the fragment payload checksum.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }

    /// Set the presentation timestamp.
    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.timestamp_ns = timestamp_ns.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for AudioPacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPacketHeader")
            .field("stream_id", &self.stream_id())
            .field("codec", &self.codec())
            .field("sample_rate", &self.sample_rate())
            .field("channel_count", &self.channel_count())
            .field("samples_per_frame", &self.samples_per_frame())
            .field("sequence_number", &self.sequence_number())
            .field("frame_number", &self.frame_number())
            .field("fragment_index", &self.fragment_index())
            .field("fragment_count", &self.fragment_count())
            .field("payload_length", &self.payload_length())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for AudioPacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for AudioPacketHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<AudioPacketHeader>(), AudioPacketHeader::SIZE);
        assert_eq!(AudioPacketHeader::SIZE, 44);
    }

    #[test]
    fn round_trip() {
        let mut header = AudioPacketHeader::new(3, AudioCodec::Opus, 48_000, 2, 480);
        header.set_sequence_number(9001);
        header.set_frame_number(300);
        header.set_payload_length(160);
        header.set_checksum(0x1234_5678);
        header.set_timestamp_ns(5_000_000_000);

        let header_bytes = header.to_bytes();
        let parsed = AudioPacketHeader::from_bytes(&header_bytes).unwrap();
        assert_eq!(&header, parsed);
        assert_eq!(parsed.codec(), Some(AudioCodec::Opus));
        assert_eq!(parsed.sample_rate(), 48_000);
        assert_eq!(parsed.samples_per_frame(), 480);
    }

    #[test]
    fn unknown_codec_tag_parses_as_none() {
        let mut header = AudioPacketHeader::new(1, AudioCodec::Lpcm, 44_100, 2, 512);
        let mut bytes = header.to_bytes();
        bytes[4..8].copy_from_slice(b"zzzz");
        let parsed = AudioPacketHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.codec(), None);

        // Structurally the packet is still valid; the receiver decides policy.
        header.set_payload_length(10);
        assert!(AudioPacketHeader::from_bytes(&header.to_bytes()).is_ok());
    }

    #[test]
    fn reject_short_buffer() {
        assert!(matches!(
            AudioPacketHeader::from_bytes(&[0u8; 10]),
            Err(ProtocolError::HeaderTooShort { expected: 44, actual: 10 })
        ));
    }
}
