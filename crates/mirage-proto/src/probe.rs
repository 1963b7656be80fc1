//! Quality probe packet header.
//!
//! During a staged bandwidth test the host emits fixed-size datagrams at each
//! stage's target rate. The header is small and unauthenticated: probe
//! payloads are filler, and the accumulator only tallies byte counts per
//! (test, stage).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 24-byte probe packet header (little-endian).
///
/// Layout: `flags u16 | stage_id u16 | test_id u32 | sequence u32 |
/// payload_length u32 | timestamp_ns u64`. Like every datagram kind, the
/// header leads with the flags word ([`crate::MediaFlags::KIND_PROBE`] set)
/// so receivers demux on bytes 0-1.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ProbePacketHeader {
    flags: [u8; 2],
    stage_id: [u8; 2],
    test_id: [u8; 4],
    sequence: [u8; 4],
    payload_length: [u8; 4],
    timestamp_ns: [u8; 8],
}

impl ProbePacketHeader {
    /// Size of the serialized header (24 bytes).
    pub const SIZE: usize = 24;

    /// Create a header for one probe packet.
    #[must_use]
    pub fn new(test_id: u32, stage_id: u16, sequence: u32, payload_length: u32) -> Self {
        Self {
            flags: crate::MediaFlags::KIND_PROBE.bits().to_le_bytes(),
            stage_id: stage_id.to_le_bytes(),
            test_id: test_id.to_le_bytes(),
            sequence: sequence.to_le_bytes(),
            payload_length: payload_length.to_le_bytes(),
            timestamp_ns: [0; 8],
        }
    }

    /// Packet flags; [`crate::MediaFlags::KIND_PROBE`] is always set.
    #[must_use]
    pub fn flags(&self) -> crate::MediaFlags {
        crate::MediaFlags::from_bits(u16::from_le_bytes(self.flags))
    }

    /// Parse a header from the front of a datagram (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::HeaderTooShort`] if fewer than 24 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0)
    }

    /// Serialize to a fixed byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Test run identifier.
    #[must_use]
    pub fn test_id(&self) -> u32 {
        u32::from_le_bytes(self.test_id)
    }

    /// Stage within the test.
    #[must_use]
    pub fn stage_id(&self) -> u16 {
        u16::from_le_bytes(self.stage_id)
    }

    /// Per-stage packet sequence number.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.sequence)
    }

    /// Filler bytes following the header.
    #[must_use]
    pub fn payload_length(&self) -> u32 {
        u32::from_le_bytes(self.payload_length)
    }

    /// Send timestamp in nanoseconds.
    #[must_use]
    pub fn timestamp_ns(&self) -> u64 {
        u64::from_le_bytes(self.timestamp_ns)
    }

    /// Set the send timestamp.
    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.timestamp_ns = timestamp_ns.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for ProbePacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbePacketHeader")
            .field("test_id", &self.test_id())
            .field("stage_id", &self.stage_id())
            .field("sequence", &self.sequence())
            .field("payload_length", &self.payload_length())
            .field("timestamp_ns", &self.timestamp_ns())
            .finish()
    }
}
