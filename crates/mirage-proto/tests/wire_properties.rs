//! Property-based tests for the wire format.
//!
//! These verify serialization is correct for ALL valid inputs, not just
//! specific examples: header round-trips, checksum discrimination, and
//! payload/envelope round-trips across every control message type.

use mirage_proto::{
    ControlPayload, MediaFlags, MediaFrameHeader,
    checksum::fragment_checksum,
    payloads::{
        quality::{QualityStage, QualityTestRequest},
        session::{Goodbye, SessionState, SessionStateUpdate},
        stream::{KeyframeRequest, ResizeAck, ResizeRequest},
    },
};
use proptest::prelude::*;

fn arbitrary_header() -> impl Strategy<Value = MediaFrameHeader> {
    (
        any::<u16>(), // stream_id
        any::<u32>(), // sequence
        any::<u32>(), // frame number
        (1u16..=32).prop_flat_map(|count| (0..count, Just(count))),
        any::<u16>(), // epoch
        any::<bool>(),
    )
        .prop_map(|(stream_id, seq, frame, (index, count), epoch, keyframe)| {
            let mut header = MediaFrameHeader::new(stream_id);
            header.set_sequence_number(seq);
            header.set_frame_number(frame);
            header.set_fragmentation(index, count);
            header.set_epoch(epoch);
            if keyframe {
                header.set_flags(MediaFlags::KEYFRAME);
            }
            header
        })
}

#[test]
fn prop_header_round_trip() {
    proptest!(|(header in arbitrary_header())| {
        let bytes = header.to_bytes();
        let parsed = MediaFrameHeader::from_bytes(&bytes).expect("valid header must parse");
        prop_assert_eq!(parsed, &header);
    });
}

#[test]
fn prop_checksum_detects_any_single_bit_flip() {
    proptest!(|(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        bit in 0usize..8,
        index_seed in any::<prop::sample::Index>(),
    )| {
        let clean = fragment_checksum(&payload);
        let mut tampered = payload.clone();
        let index = index_seed.index(tampered.len());
        tampered[index] ^= 1 << bit;
        prop_assert_ne!(fragment_checksum(&tampered), clean);
    });
}

fn arbitrary_payload() -> impl Strategy<Value = ControlPayload> {
    prop_oneof![
        Just(ControlPayload::Ping),
        Just(ControlPayload::Pong),
        any::<u16>().prop_map(|stream_id| ControlPayload::KeyframeRequest(KeyframeRequest {
            stream_id
        })),
        (any::<u16>(), any::<u16>()).prop_map(|(stream_id, dimension_token)| {
            ControlPayload::ResizeAck(ResizeAck { stream_id, dimension_token })
        }),
        (any::<u16>(), 2u32..5120, 2u32..2880, any::<u16>()).prop_map(
            |(stream_id, w, h, token)| {
                ControlPayload::ResizeRequest(ResizeRequest {
                    stream_id,
                    pixel_width: w & !1,
                    pixel_height: h & !1,
                    relative_scale: 1.0,
                    dimension_token: token,
                })
            }
        ),
        prop_oneof![
            Just(SessionState::Active),
            Just(SessionState::Locked),
            Just(SessionState::Disconnected)
        ]
        .prop_map(|state| ControlPayload::SessionStateUpdate(SessionStateUpdate { state })),
        ".{0,32}".prop_map(|reason| ControlPayload::Goodbye(Goodbye { reason })),
        (any::<u32>(), 1u16..8).prop_map(|(test_id, stages)| {
            ControlPayload::QualityTestRequest(QualityTestRequest {
                test_id,
                stages: (0..stages)
                    .map(|id| QualityStage {
                        id,
                        duration_ms: 1000,
                        target_bitrate_bps: u64::from(id + 1) * 10_000_000,
                    })
                    .collect(),
                payload_size: 1184,
                include_codec_benchmark: false,
            })
        }),
    ]
}

#[test]
fn prop_payload_envelope_round_trip() {
    proptest!(|(payload in arbitrary_payload())| {
        let envelope = payload.clone().into_envelope().expect("encode must succeed");

        let mut wire = Vec::new();
        envelope.encode(&mut wire).expect("framing must succeed");

        let mut decoder = mirage_proto::EnvelopeDecoder::new();
        decoder.extend(&wire);
        let received = decoder
            .next_envelope()
            .expect("framing must parse")
            .expect("one envelope buffered");

        let decoded = ControlPayload::from_envelope(&received).expect("payload must decode");
        prop_assert_eq!(decoded, payload);
    });
}
