//! End-to-end data path test: fragment → seal → (lossy network) → open →
//! reassemble.
//!
//! Drives the exact pipeline the host and client glue run, without
//! sockets: a sender fragments and seals encoded frames, the test shuffles
//! and corrupts datagrams, and the receiver opens and reassembles. This is
//! where the cross-layer invariants live: CRC and AEAD agree on payload
//! bytes, headers round-trip through the wire, and delivery stays monotone
//! under reordering.

use std::time::Duration;

use mirage_core::{
    FrameReassembler, ReassemblerConfig,
    send_budget::FragmentSizing,
};
use mirage_crypto::{
    MediaCipher, SessionKey,
    media_aead::{Direction, MediaKind, PacketContext},
};
use mirage_proto::{MediaFlags, MediaFrameHeader, checksum::fragment_checksum};

type Ms = Duration;

fn at(ms: u64) -> Ms {
    Duration::from_millis(ms)
}

fn session_key() -> SessionKey {
    let mut bytes = [0u8; 32];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i * 7 + 13) as u8;
    }
    SessionKey::from_bytes(bytes)
}

/// A sealed datagram as it would appear on the wire.
struct Datagram {
    header: MediaFrameHeader,
    sealed: Vec<u8>,
}

struct Sender {
    cipher: MediaCipher,
    sizing: FragmentSizing,
    sequence: u32,
    epoch: u16,
}

impl Sender {
    fn new(key: &SessionKey, max_packet_size: usize) -> Self {
        Self {
            cipher: MediaCipher::new(key, Direction::HostToClient),
            sizing: FragmentSizing::new(max_packet_size).unwrap(),
            sequence: 0,
            epoch: 0,
        }
    }

    fn send_frame(&mut self, frame_number: u32, payload: &[u8], keyframe: bool) -> Vec<Datagram> {
        let count = self.sizing.fragment_count(payload.len());
        let mut datagrams = Vec::with_capacity(count);

        for index in 0..count {
            let range = self.sizing.fragment_range(payload.len(), index);
            let fragment = &payload[range];

            let mut header = MediaFrameHeader::new(7);
            header.set_frame_number(frame_number);
            header.set_sequence_number(self.sequence);
            header.set_timestamp_ns(u64::from(frame_number) * 16_666_667);
            header.set_fragmentation(index as u16, count as u16);
            header.set_payload_length(fragment.len() as u32);
            header.set_frame_byte_count(payload.len() as u32);
            header.set_checksum(fragment_checksum(fragment));
            header.set_epoch(self.epoch);
            let mut flags = MediaFlags::empty();
            if keyframe {
                flags = flags.union(MediaFlags::KEYFRAME);
            }
            if index + 1 == count {
                flags = flags.union(MediaFlags::END_OF_FRAME);
            }
            header.set_flags(flags);

            let sealed = self.cipher.seal(&context_for(&header), fragment);
            self.sequence += 1;
            datagrams.push(Datagram { header, sealed });
        }
        datagrams
    }
}

fn context_for(header: &MediaFrameHeader) -> PacketContext {
    PacketContext {
        kind: MediaKind::Video,
        epoch: header.epoch(),
        stream_id: header.stream_id(),
        sequence: header.sequence_number(),
        fragment_index: header.fragment_index(),
    }
}

struct Receiver {
    cipher: MediaCipher,
    reassembler: FrameReassembler<Ms>,
}

impl Receiver {
    fn new(key: &SessionKey) -> Self {
        Self {
            cipher: MediaCipher::new(key, Direction::HostToClient),
            reassembler: FrameReassembler::new(7, ReassemblerConfig::default()),
        }
    }

    fn receive(&mut self, datagram: &Datagram, now: Ms) -> Option<mirage_core::AssembledFrame> {
        // Wire round-trip of the cleartext header.
        let header_bytes = datagram.header.to_bytes();
        let header = MediaFrameHeader::from_bytes(&header_bytes).ok()?;

        match self.cipher.open(&context_for(header), &datagram.sealed) {
            Ok(payload) => self.reassembler.process_packet(header, &payload, now),
            Err(_) => {
                self.reassembler.note_decrypt_failure();
                None
            },
        }
    }
}

#[test]
fn multi_fragment_frame_round_trips() {
    let key = session_key();
    let mut sender = Sender::new(&key, 1232);
    let mut receiver = Receiver::new(&key);

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let datagrams = sender.send_frame(1, &payload, true);
    assert!(datagrams.len() > 40, "50 KB keyframe spans many datagrams");

    let mut delivered = None;
    for (i, datagram) in datagrams.iter().enumerate() {
        let result = receiver.receive(datagram, at(i as u64));
        if result.is_some() {
            delivered = result;
        }
    }

    let frame = delivered.expect("keyframe must deliver");
    assert_eq!(frame.bytes, payload);
    assert!(frame.is_keyframe);
    assert_eq!(receiver.reassembler.counters().frames_delivered, 1);
    assert_eq!(receiver.reassembler.counters().discarded_crc, 0);
}

#[test]
fn reordered_fragments_still_assemble_byte_exact() {
    let key = session_key();
    let mut sender = Sender::new(&key, 1232);
    let mut receiver = Receiver::new(&key);

    let payload: Vec<u8> = (0..9_000u32).map(|i| (i % 239) as u8).collect();
    let mut datagrams = sender.send_frame(3, &payload, true);
    datagrams.reverse();

    let mut delivered = None;
    for datagram in &datagrams {
        if let Some(frame) = receiver.receive(datagram, at(5)) {
            delivered = Some(frame);
        }
    }
    assert_eq!(delivered.expect("frame must deliver").bytes, payload);
}

#[test]
fn corrupted_datagram_is_dropped_not_delivered() {
    let key = session_key();
    let mut sender = Sender::new(&key, 1232);
    let mut receiver = Receiver::new(&key);

    let payload = vec![0x42u8; 4_000];
    let mut datagrams = sender.send_frame(1, &payload, true);

    // Flip a ciphertext bit in the middle datagram.
    let middle = datagrams.len() / 2;
    datagrams[middle].sealed[10] ^= 0x04;

    let mut delivered = false;
    for datagram in &datagrams {
        delivered |= receiver.receive(datagram, at(1)).is_some();
    }
    assert!(!delivered, "frame with a corrupt fragment must not deliver");
    assert_eq!(receiver.reassembler.counters().decrypt_failed, 1);

    // Resending the frame intact delivers it.
    let datagrams = sender.send_frame(2, &payload, true);
    let mut frame = None;
    for datagram in &datagrams {
        if let Some(f) = receiver.receive(datagram, at(2)) {
            frame = Some(f);
        }
    }
    assert_eq!(frame.expect("retransmit delivers").bytes, payload);
}

#[test]
fn wrong_session_key_delivers_nothing() {
    let mut sender = Sender::new(&session_key(), 1232);
    let mut receiver = Receiver::new(&SessionKey::from_bytes([0xEE; 32]));

    let datagrams = sender.send_frame(1, &vec![1u8; 2_000], true);
    for datagram in &datagrams {
        assert!(receiver.receive(datagram, at(0)).is_none());
    }
    let counters = receiver.reassembler.counters();
    assert_eq!(counters.decrypt_failed as usize, datagrams.len());
    assert_eq!(counters.frames_delivered, 0);
}

#[test]
fn interleaved_streams_of_frames_deliver_in_order() {
    let key = session_key();
    let mut sender = Sender::new(&key, 1232);
    let mut receiver = Receiver::new(&key);

    // Keyframe delivers cleanly first.
    let mut delivered = Vec::new();
    for datagram in sender.send_frame(1, &vec![0xA0; 3_000], true) {
        if let Some(frame) = receiver.receive(&datagram, at(0)) {
            delivered.push(frame.frame_number);
        }
    }

    // Then a run of P-frames whose fragments interleave pairwise.
    let mut wire: Vec<Datagram> = Vec::new();
    for frame_number in 2..=6u32 {
        wire.extend(sender.send_frame(frame_number, &vec![frame_number as u8; 2_500], false));
    }
    for pair in wire.chunks_mut(6) {
        pair.reverse();
    }

    for (i, datagram) in wire.iter().enumerate() {
        if let Some(frame) = receiver.receive(datagram, at(1 + i as u64)) {
            delivered.push(frame.frame_number);
        }
    }

    // Whatever subset survives the shuffle must be strictly increasing.
    assert!(delivered.len() >= 2);
    for pair in delivered.windows(2) {
        assert!(pair[1] > pair[0], "delivery order violated: {delivered:?}");
    }
}

#[test]
fn epoch_bump_with_keyframe_recovers_the_stream() {
    let key = session_key();
    let mut sender = Sender::new(&key, 1232);
    let mut receiver = Receiver::new(&key);

    for datagram in sender.send_frame(1, &vec![1u8; 2_000], true) {
        receiver.receive(&datagram, at(0));
    }
    for datagram in sender.send_frame(2, &vec![2u8; 2_000], false) {
        receiver.receive(&datagram, at(1));
    }

    // Hard recovery on the sender: epoch bumps, numbering restarts.
    sender.epoch = 1;

    // A straggler P-frame from the new epoch arrives before its keyframe.
    let stragglers = sender.send_frame(3, &vec![3u8; 1_000], false);
    for datagram in &stragglers {
        assert!(receiver.receive(datagram, at(2)).is_none());
    }
    assert!(receiver.reassembler.counters().discarded_epoch > 0);

    // The epoch keyframe resets and delivers.
    let mut frame = None;
    for datagram in sender.send_frame(1, &vec![4u8; 2_000], true) {
        if let Some(f) = receiver.receive(&datagram, at(3)) {
            frame = Some(f);
        }
    }
    let frame = frame.expect("epoch keyframe delivers");
    assert!(frame.is_keyframe);
    assert_eq!(receiver.reassembler.current_epoch(), 1);
}
