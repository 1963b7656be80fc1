//! Fuzz target for packet header parsing.
//!
//! # Invariants
//!
//! - Parsing arbitrary bytes NEVER panics (zerocopy casts are total)
//! - Accepted headers re-serialize to the identical byte prefix
//! - Rejected headers report a typed error, never garbage

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirage_proto::{
    MediaFrameHeader, audio::AudioPacketHeader, probe::ProbePacketHeader,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = MediaFrameHeader::from_bytes(data) {
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..MediaFrameHeader::SIZE]);
        assert!(header.fragment_index() < header.fragment_count());
    }

    if let Ok(header) = AudioPacketHeader::from_bytes(data) {
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..AudioPacketHeader::SIZE]);
    }

    if let Ok(header) = ProbePacketHeader::from_bytes(data) {
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..], &data[..ProbePacketHeader::SIZE]);
    }
});
