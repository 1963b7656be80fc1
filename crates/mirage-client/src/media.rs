//! UDP media receive task.
//!
//! Single reader on the data socket; demuxes datagram kinds on the leading
//! flags word, decrypts, and feeds the per-stream reassemblers it owns.
//! The reassemblers have exactly one writer, this task, so no locking
//! touches the packet path. Every reject is a counter bump, never an
//! error.

use std::{collections::HashMap, time::Instant};

use mirage_core::reassembler::{FrameReassembler, ReassemblerConfig};
use mirage_crypto::{
    MediaCipher,
    media_aead::{MediaKind, PacketContext},
};
use mirage_proto::{
    MediaFlags, MediaFrameHeader,
    audio::AudioPacketHeader,
    checksum::fragment_checksum,
    probe::ProbePacketHeader,
};
use tokio::{net::UdpSocket, sync::mpsc};

use crate::CoordMsg;

/// Commands from the coordination task into the receive loop.
///
/// The reassemblers are single-writer; state changes they need (like
/// keyframe-only mode on a decoder fault) arrive as messages rather than
/// through a shared lock.
#[derive(Debug)]
pub(crate) enum MediaCommand {
    /// Purge non-keyframes and drop them until a fresh keyframe.
    EnterKeyframeOnlyMode {
        /// Affected stream.
        stream_id: u16,
    },
}

/// UDP receive loop. `cipher` opens host→client packets.
pub(crate) async fn run_receiver(
    socket: UdpSocket,
    cipher: MediaCipher,
    config: ReassemblerConfig,
    mut commands: mpsc::Receiver<MediaCommand>,
    to_coord: mpsc::Sender<CoordMsg>,
) {
    let mut reassemblers: HashMap<u16, FrameReassembler<Instant>> = HashMap::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let len = tokio::select! {
            received = socket.recv(&mut buf) => match received {
                Ok(len) => len,
                Err(err) => {
                    tracing::warn!(%err, "udp receive failed");
                    break;
                },
            },
            command = commands.recv() => match command {
                Some(MediaCommand::EnterKeyframeOnlyMode { stream_id }) => {
                    if let Some(reassembler) = reassemblers.get_mut(&stream_id) {
                        reassembler.enter_keyframe_only_mode(Instant::now());
                    }
                    continue;
                },
                None => break,
            },
        };
        let datagram = &buf[..len];
        if datagram.len() < 2 {
            continue;
        }

        let flags = MediaFlags::from_bits(u16::from_le_bytes([datagram[0], datagram[1]]));
        let forwarded = if flags.contains(MediaFlags::KIND_PROBE) {
            handle_probe(datagram, &to_coord).await
        } else if flags.contains(MediaFlags::KIND_AUDIO) {
            handle_audio(datagram, &cipher, &to_coord).await
        } else {
            handle_video(datagram, &cipher, config, &mut reassemblers, &to_coord).await
        };

        if !forwarded {
            // Coordination task gone; the session is over.
            break;
        }
    }
}

async fn handle_probe(datagram: &[u8], to_coord: &mpsc::Sender<CoordMsg>) -> bool {
    let Ok(header) = ProbePacketHeader::from_bytes(datagram) else {
        return true;
    };
    to_coord.send(CoordMsg::Probe(*header)).await.is_ok()
}

async fn handle_audio(
    datagram: &[u8],
    cipher: &MediaCipher,
    to_coord: &mpsc::Sender<CoordMsg>,
) -> bool {
    let Ok(header) = AudioPacketHeader::from_bytes(datagram) else {
        return true;
    };
    let header = *header;
    let sealed = &datagram[AudioPacketHeader::SIZE..];

    let ctx = PacketContext {
        kind: MediaKind::Audio,
        epoch: 0,
        stream_id: header.stream_id(),
        sequence: header.sequence_number(),
        fragment_index: header.fragment_index(),
    };
    let Ok(payload) = cipher.open(&ctx, sealed) else {
        tracing::trace!(stream = header.stream_id(), "audio decrypt failed");
        return true;
    };
    if fragment_checksum(&payload) != header.checksum() {
        tracing::trace!(stream = header.stream_id(), "audio checksum mismatch");
        return true;
    }

    to_coord
        .send(CoordMsg::Audio {
            stream_id: header.stream_id(),
            codec: header.codec(),
            timestamp_ns: header.timestamp_ns(),
            payload,
        })
        .await
        .is_ok()
}

async fn handle_video(
    datagram: &[u8],
    cipher: &MediaCipher,
    config: ReassemblerConfig,
    reassemblers: &mut HashMap<u16, FrameReassembler<Instant>>,
    to_coord: &mpsc::Sender<CoordMsg>,
) -> bool {
    let Ok(header) = MediaFrameHeader::from_bytes(datagram) else {
        return true;
    };
    let header = *header;
    let sealed = &datagram[MediaFrameHeader::SIZE..];

    let reassembler = reassemblers
        .entry(header.stream_id())
        .or_insert_with(|| FrameReassembler::new(header.stream_id(), config));

    if header.flags().contains(MediaFlags::PARITY) {
        // Parity packets protect against loss the keyframe machinery
        // already recovers from; receivers without an FEC decoder skip
        // them.
        return true;
    }

    let ctx = PacketContext {
        kind: MediaKind::Video,
        epoch: header.epoch(),
        stream_id: header.stream_id(),
        sequence: header.sequence_number(),
        fragment_index: header.fragment_index(),
    };
    let payload = match cipher.open(&ctx, sealed) {
        Ok(payload) => payload,
        Err(_) => {
            reassembler.note_decrypt_failure();
            return true;
        },
    };

    let assembled = reassembler.process_packet(&header, &payload, Instant::now());
    let keyframe_wanted = reassembler.should_request_keyframe();

    if let Some(frame) = assembled
        && to_coord.send(CoordMsg::Assembled(frame)).await.is_err()
    {
        return false;
    }
    if keyframe_wanted
        && to_coord
            .send(CoordMsg::ReassemblyStalled { stream_id: header.stream_id() })
            .await
            .is_err()
    {
        return false;
    }
    true
}
