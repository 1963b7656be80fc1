//! Per-stream UDP packet sender.
//!
//! Receives encoded frames from the encode task, fragments them against
//! the configured packet size, seals each fragment, and bursts the
//! datagrams to the session's registered peer. Queued-byte accounting is
//! shared with the encode task, which drops frames at the producer when
//! the queue is not draining.
//!
//! FEC parity rides behind each frame's data fragments: one XOR packet per
//! parity block, flagged [`MediaFlags::PARITY`]. Keyframes always carry
//! parity; P-frames only during a hard recovery window.

use std::{net::SocketAddr, sync::Arc, time::Instant};

use mirage_core::{
    send_budget::{FragmentSizing, SendBudget},
    stream_context::HostStreamContext,
    traits::EncodedFrame,
};
use mirage_crypto::{
    MediaCipher,
    media_aead::{MediaKind, PacketContext},
};
use mirage_proto::{MediaFlags, MediaFrameHeader, checksum::fragment_checksum};
use tokio::{
    net::UdpSocket,
    sync::{Mutex, RwLock, mpsc},
};

/// Sender-task wiring for one stream.
pub(crate) struct SenderTask {
    /// Shared data socket.
    pub socket: Arc<UdpSocket>,
    /// Registered client endpoint; `None` until UDP registration lands.
    pub peer: Arc<RwLock<Option<SocketAddr>>>,
    /// Host→client sealing cipher for the session.
    pub cipher: Arc<MediaCipher>,
    /// Stream being sent.
    pub stream_id: u16,
    /// Fragment geometry.
    pub sizing: FragmentSizing,
    /// Shared queued-byte accounting.
    pub budget: Arc<Mutex<SendBudget>>,
    /// Stream context (epoch, token, FEC policy, in-flight keyframe).
    pub context: Arc<Mutex<HostStreamContext<Instant>>>,
}

/// Run the sender loop until the frame channel closes.
pub(crate) async fn run_sender(task: SenderTask, mut frames: mpsc::Receiver<EncodedFrame>) {
    let mut sequence: u32 = 0;
    let mut frame_number: u32 = 0;

    while let Some(frame) = frames.recv().await {
        let Some(peer) = *task.peer.read().await else {
            // No registered endpoint yet; media cannot flow.
            tracing::trace!(stream = task.stream_id, "dropping frame, peer unregistered");
            continue;
        };

        frame_number = frame_number.wrapping_add(1);

        let (epoch, dimension_token, parity_block) = {
            let context = task.context.lock().await;
            let parity = if frame.is_keyframe {
                context.keyframe_parity()
            } else {
                context.pframe_parity()
            };
            (context.epoch(), context.dimension_token(), parity)
        };

        let sent = send_frame(
            &task,
            peer,
            &frame,
            frame_number,
            epoch,
            dimension_token,
            parity_block,
            &mut sequence,
        )
        .await;

        if sent && frame.is_keyframe {
            task.context.lock().await.keyframe_sent();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_frame(
    task: &SenderTask,
    peer: SocketAddr,
    frame: &EncodedFrame,
    frame_number: u32,
    epoch: u16,
    dimension_token: u16,
    parity_block: u8,
    sequence: &mut u32,
) -> bool {
    let payload = &frame.bytes[..];
    let count = task.sizing.fragment_count(payload.len());
    let chunk = task.sizing.max_fragment_payload();
    let mut parity_buf = vec![0u8; chunk];
    let mut parity_fill = 0usize;

    for index in 0..count {
        let range = task.sizing.fragment_range(payload.len(), index);
        let fragment = &payload[range];

        let mut flags = MediaFlags::empty();
        if frame.is_keyframe {
            flags = flags.union(MediaFlags::KEYFRAME);
        }
        if index + 1 == count {
            flags = flags.union(MediaFlags::END_OF_FRAME);
        }

        let mut header = MediaFrameHeader::new(task.stream_id);
        header.set_flags(flags);
        header.set_sequence_number(*sequence);
        header.set_timestamp_ns(frame.timestamp_ns);
        header.set_frame_number(frame_number);
        header.set_fragmentation(index as u16, count as u16);
        header.set_payload_length(fragment.len() as u32);
        header.set_frame_byte_count(payload.len() as u32);
        header.set_checksum(fragment_checksum(fragment));
        header.set_content_rect(frame.content_rect);
        header.set_dimension_token(dimension_token);
        header.set_epoch(epoch);

        if !send_datagram(task, peer, &header, fragment, *sequence).await {
            return false;
        }
        *sequence = sequence.wrapping_add(1);

        // Accumulate XOR parity across the block.
        if parity_block > 0 {
            for (accumulator, byte) in parity_buf.iter_mut().zip(fragment.iter()) {
                *accumulator ^= byte;
            }
            parity_fill = parity_fill.max(fragment.len());

            let block_end = (index + 1) % parity_block as usize == 0 || index + 1 == count;
            if block_end {
                let block_start = index - (index % parity_block as usize);
                let mut parity_header = MediaFrameHeader::new(task.stream_id);
                let mut parity_flags = flags.union(MediaFlags::PARITY);
                if frame.is_keyframe {
                    parity_flags = parity_flags.union(MediaFlags::KEYFRAME);
                }
                parity_header.set_flags(parity_flags);
                parity_header.set_sequence_number(*sequence);
                parity_header.set_timestamp_ns(frame.timestamp_ns);
                parity_header.set_frame_number(frame_number);
                parity_header.set_fragmentation(block_start as u16, count as u16);
                parity_header.set_payload_length(parity_fill as u32);
                parity_header.set_frame_byte_count(payload.len() as u32);
                parity_header.set_checksum(fragment_checksum(&parity_buf[..parity_fill]));
                parity_header.set_content_rect(frame.content_rect);
                parity_header.set_dimension_token(dimension_token);
                parity_header.set_epoch(epoch);

                let parity_payload = parity_buf[..parity_fill].to_vec();
                if !send_datagram(task, peer, &parity_header, &parity_payload, *sequence).await {
                    return false;
                }
                *sequence = sequence.wrapping_add(1);
                parity_buf.iter_mut().for_each(|b| *b = 0);
                parity_fill = 0;
            }
        }
    }
    true
}

async fn send_datagram(
    task: &SenderTask,
    peer: SocketAddr,
    header: &MediaFrameHeader,
    fragment: &[u8],
    sequence: u32,
) -> bool {
    let ctx = PacketContext {
        kind: MediaKind::Video,
        epoch: header.epoch(),
        stream_id: header.stream_id(),
        sequence,
        fragment_index: header.fragment_index(),
    };
    let sealed = task.cipher.seal(&ctx, fragment);

    let mut datagram = Vec::with_capacity(MediaFrameHeader::SIZE + sealed.len());
    datagram.extend_from_slice(&header.to_bytes());
    datagram.extend_from_slice(&sealed);

    task.budget.lock().await.on_queued(datagram.len());
    let result = task.socket.send_to(&datagram, peer).await;
    task.budget.lock().await.on_sent(datagram.len());

    match result {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(%err, stream = task.stream_id, "udp send failed");
            false
        },
    }
}
