//! Fuzz target for the frame reassembler.
//!
//! Drives arbitrary packet sequences (forged headers, wrong checksums,
//! epoch/token churn, interleaved fragments) through a reassembler on a
//! virtual clock.
//!
//! # Invariants
//!
//! - `process_packet` NEVER panics
//! - Delivered frames always pass the structural checks (length matches
//!   the declared frame byte count)
//! - Keyframe-only mode never delivers a non-keyframe before a keyframe

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mirage_core::reassembler::{FrameReassembler, ReassemblerConfig};
use mirage_proto::{MediaFlags, MediaFrameHeader, checksum::fragment_checksum};

#[derive(Debug, Arbitrary)]
struct Packet {
    frame_number: u16,
    fragment_index: u8,
    fragment_count: u8,
    keyframe: bool,
    discontinuity: bool,
    epoch: u8,
    token: u8,
    good_checksum: bool,
    payload: Vec<u8>,
    at_ms: u16,
}

#[derive(Debug, Arbitrary)]
struct Input {
    packets: Vec<Packet>,
    keyframe_only_at: Option<u8>,
}

fuzz_target!(|input: Input| {
    let mut reassembler: FrameReassembler<Duration> =
        FrameReassembler::new(1, ReassemblerConfig::default());
    let mut clock = Duration::ZERO;
    let mut awaiting_since_mode = false;

    for (i, packet) in input.packets.iter().enumerate() {
        if input.keyframe_only_at == Some(i as u8) {
            reassembler.enter_keyframe_only_mode(clock);
            awaiting_since_mode = true;
        }

        let count = packet.fragment_count.max(1) as u16;
        let index = u16::from(packet.fragment_index) % count;
        let payload = &packet.payload[..packet.payload.len().min(1024)];

        let mut header = MediaFrameHeader::new(1);
        header.set_frame_number(u32::from(packet.frame_number));
        header.set_fragmentation(index, count);
        header.set_payload_length(payload.len() as u32);
        header.set_frame_byte_count(u32::from(count) * payload.len() as u32);
        header.set_epoch(u16::from(packet.epoch));
        header.set_dimension_token(u16::from(packet.token));
        header.set_checksum(if packet.good_checksum {
            fragment_checksum(payload)
        } else {
            fragment_checksum(payload).wrapping_add(1)
        });
        let mut flags = MediaFlags::empty();
        if packet.keyframe {
            flags = flags.union(MediaFlags::KEYFRAME);
        }
        if packet.discontinuity {
            flags = flags.union(MediaFlags::DISCONTINUITY);
        }
        header.set_flags(flags);

        clock += Duration::from_millis(u64::from(packet.at_ms));
        if let Some(frame) = reassembler.process_packet(&header, payload, clock) {
            assert_eq!(frame.bytes.len(), u32::from(count) as usize * payload.len());
            if awaiting_since_mode {
                assert!(frame.is_keyframe, "keyframe-only mode delivered a P-frame first");
                awaiting_since_mode = false;
            }
        }
    }
});
