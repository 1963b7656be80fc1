//! Per-stream frame reassembly.
//!
//! The reassembler is single-writer: its owning receive task feeds it one
//! decrypted fragment at a time and it returns a completed frame when the
//! last fragment lands. Admission is a fixed rule chain (epoch, then
//! discontinuity, then dimension token, then keyframe-only mode, then CRC,
//! then staleness), and every rejection is a silent drop that bumps exactly
//! one counter. Nothing on this path returns an error.
//!
//! # Delivery ordering
//!
//! Frames reach the decoder in strictly increasing `frame_number` order
//! within a stream, except across an epoch reset where a keyframe restarts
//! numbering. Keyframes are privileged throughout: never dropped as stale,
//! never preempted while incomplete, and delivery of one purges every older
//! pending P-frame.

use std::{
    collections::HashMap,
    ops::Sub,
    time::{Duration, Instant},
};

use mirage_proto::{ContentRect, MediaFlags, MediaFrameHeader, checksum::fragment_checksum};

use crate::config::StreamConfig;

/// Frame-number distance beyond which a "smaller" number is treated as a
/// wrap-around rather than a stale frame.
const WRAP_DISTANCE: u32 = 1000;

/// Pending-frame count above which the stream should ask for a keyframe.
const PENDING_REQUEST_THRESHOLD: usize = 5;

/// Reassembler tuning, derived from [`StreamConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblerConfig {
    /// P-frame lifetime from first fragment to forced drop.
    pub pframe_timeout: Duration,
    /// Keyframe lifetime; much longer, keyframes span many datagrams.
    pub keyframe_timeout: Duration,
    /// Whether P-frames must match the expected dimension token.
    pub validate_dimension_token: bool,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            pframe_timeout: Duration::from_millis(500),
            keyframe_timeout: Duration::from_secs(4),
            validate_dimension_token: true,
        }
    }
}

impl From<&StreamConfig> for ReassemblerConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            pframe_timeout: config.pframe_timeout,
            keyframe_timeout: config.keyframe_timeout,
            validate_dimension_token: true,
        }
    }
}

/// A fully reassembled encoded frame, ready for the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFrame {
    /// Owning stream.
    pub stream_id: u16,
    /// Monotonic frame number.
    pub frame_number: u32,
    /// Whether this is a keyframe.
    pub is_keyframe: bool,
    /// Presentation timestamp, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Non-padded pixel region.
    pub content_rect: ContentRect,
    /// Concatenated fragment payloads in index order.
    pub bytes: Vec<u8>,
}

/// Silent-drop counters, one per admission rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerCounters {
    /// Every fragment handed to `process_packet`.
    pub packets_received: u64,
    /// Frames handed to the decoder.
    pub frames_delivered: u64,
    /// Pending frames dropped by timeout, supersession, or length mismatch.
    pub dropped_frames: u64,
    /// Fragments of frames older than the last completed frame.
    pub discarded_old: u64,
    /// Fragments failing the payload CRC.
    pub discarded_crc: u64,
    /// P-frame fragments with a stale dimension token.
    pub discarded_token: u64,
    /// Fragments from a stale epoch or carrying a discontinuity we could
    /// not recover from without a keyframe.
    pub discarded_epoch: u64,
    /// Non-keyframe fragments dropped while awaiting a keyframe.
    pub discarded_awaiting_keyframe: u64,
    /// Datagrams whose AEAD open failed (recorded by the receive task).
    pub decrypt_failed: u64,
}

#[derive(Debug)]
struct PendingFrame<I> {
    fragments: HashMap<u16, Vec<u8>>,
    total_fragments: u16,
    is_keyframe: bool,
    timestamp_ns: u64,
    content_rect: ContentRect,
    frame_byte_count: u32,
    received_at: I,
}

/// Treat `candidate` as newer than `reference`, accounting for wrap-around:
/// a smaller number at distance >= [`WRAP_DISTANCE`] wrapped past u32::MAX.
fn frame_is_newer(candidate: u32, reference: u32) -> bool {
    candidate > reference || reference.wrapping_sub(candidate) >= WRAP_DISTANCE
}

/// Per-stream reassembly state machine.
///
/// Generic over the instant type so tests drive virtual time.
#[derive(Debug)]
pub struct FrameReassembler<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    stream_id: u16,
    config: ReassemblerConfig,
    current_epoch: u16,
    expected_dimension_token: Option<u16>,
    last_completed_frame: Option<u32>,
    last_delivered_keyframe: Option<u32>,
    awaiting_keyframe: bool,
    awaiting_keyframe_since: Option<I>,
    pending: HashMap<u32, PendingFrame<I>>,
    counters: ReassemblerCounters,
}

impl<I> FrameReassembler<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a reassembler for one stream.
    #[must_use]
    pub fn new(stream_id: u16, config: ReassemblerConfig) -> Self {
        Self {
            stream_id,
            config,
            current_epoch: 0,
            expected_dimension_token: None,
            last_completed_frame: None,
            last_delivered_keyframe: None,
            awaiting_keyframe: false,
            awaiting_keyframe_since: None,
            pending: HashMap::new(),
            counters: ReassemblerCounters::default(),
        }
    }

    /// Stream this reassembler serves.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Snapshot of the drop counters.
    #[must_use]
    pub fn counters(&self) -> ReassemblerCounters {
        self.counters
    }

    /// Current epoch being accepted.
    #[must_use]
    pub fn current_epoch(&self) -> u16 {
        self.current_epoch
    }

    /// Whether non-keyframes are currently being discarded.
    #[must_use]
    pub fn awaiting_keyframe(&self) -> bool {
        self.awaiting_keyframe
    }

    /// When keyframe-only mode began, if active.
    #[must_use]
    pub fn awaiting_keyframe_since(&self) -> Option<I> {
        self.awaiting_keyframe_since
    }

    /// Frames currently under reassembly.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record an AEAD open failure observed by the receive task.
    pub fn note_decrypt_failure(&mut self) {
        self.counters.decrypt_failed += 1;
    }

    /// Whether the controller should request a keyframe: reassembly is not
    /// converging when too many frames sit incomplete.
    #[must_use]
    pub fn should_request_keyframe(&self) -> bool {
        self.pending.len() > PENDING_REQUEST_THRESHOLD
    }

    /// Enter keyframe-only mode: purge all non-keyframe pending frames and
    /// discard incoming non-keyframes until a fresh keyframe delivers.
    ///
    /// Used by the client on decode errors and decode backpressure.
    pub fn enter_keyframe_only_mode(&mut self, now: I) {
        let before = self.pending.len();
        self.pending.retain(|_, frame| frame.is_keyframe);
        self.counters.dropped_frames += (before - self.pending.len()) as u64;
        if !self.awaiting_keyframe {
            self.awaiting_keyframe = true;
            self.awaiting_keyframe_since = Some(now);
        }
        tracing::debug!(stream = self.stream_id, purged = before - self.pending.len(),
            "entering keyframe-only mode");
    }

    /// Process one decrypted fragment. Returns a frame when its last
    /// fragment lands and the delivery policy admits it.
    ///
    /// Invalid fragments are dropped silently; the matching counter is the
    /// only observable effect.
    pub fn process_packet(
        &mut self,
        header: &MediaFrameHeader,
        payload: &[u8],
        now: I,
    ) -> Option<AssembledFrame> {
        self.counters.packets_received += 1;
        self.cleanup_old_frames(now);

        let is_keyframe = header.is_keyframe();

        // Rule 1: epoch. A keyframe at a new epoch resets the stream; a
        // P-frame at any other epoch is noise from before the reset.
        if header.epoch() != self.current_epoch {
            if is_keyframe {
                self.reset_for_epoch(header.epoch());
            } else {
                self.counters.discarded_epoch += 1;
                self.set_awaiting_keyframe(now);
                return None;
            }
        }

        // Rule 2: discontinuity, same split as epoch but without renumbering.
        if header.flags().contains(MediaFlags::DISCONTINUITY) {
            if is_keyframe {
                self.purge_all_pending_pframes();
            } else {
                self.counters.discarded_epoch += 1;
                self.set_awaiting_keyframe(now);
                return None;
            }
        }

        // Rule 3: dimension token. Keyframes carry fresh parameter sets and
        // define the expectation; P-frames must match it.
        if self.config.validate_dimension_token {
            if is_keyframe {
                self.expected_dimension_token = Some(header.dimension_token());
            } else if let Some(expected) = self.expected_dimension_token
                && expected != header.dimension_token()
            {
                self.counters.discarded_token += 1;
                return None;
            }
        }

        // Rule 4: keyframe-only mode.
        if self.awaiting_keyframe && !is_keyframe {
            self.counters.discarded_awaiting_keyframe += 1;
            return None;
        }

        // Rule 5: payload integrity.
        if fragment_checksum(payload) != header.checksum() {
            self.counters.discarded_crc += 1;
            return None;
        }

        // Rule 6: staleness. Keyframes are exempt; a large keyframe's tail
        // fragments legitimately arrive after newer small P-frames complete.
        let frame_number = header.frame_number();
        if !is_keyframe
            && let Some(last) = self.last_completed_frame
            && frame_number < last
            && last - frame_number < WRAP_DISTANCE
        {
            self.counters.discarded_old += 1;
            return None;
        }

        self.insert_fragment(header, payload, now);
        self.try_complete(frame_number)
    }

    fn insert_fragment(&mut self, header: &MediaFrameHeader, payload: &[u8], now: I) {
        let frame_number = header.frame_number();
        let entry = self.pending.entry(frame_number).or_insert_with(|| PendingFrame {
            fragments: HashMap::new(),
            total_fragments: header.fragment_count(),
            is_keyframe: header.is_keyframe(),
            timestamp_ns: header.timestamp_ns(),
            content_rect: header.content_rect(),
            frame_byte_count: header.frame_byte_count(),
            received_at: now,
        });

        // A header disagreeing with the first-seen fragmentation is a stale
        // duplicate frame number (e.g. across a resize); restart the entry.
        if entry.total_fragments != header.fragment_count()
            || entry.frame_byte_count != header.frame_byte_count()
        {
            self.counters.dropped_frames += 1;
            *entry = PendingFrame {
                fragments: HashMap::new(),
                total_fragments: header.fragment_count(),
                is_keyframe: header.is_keyframe(),
                timestamp_ns: header.timestamp_ns(),
                content_rect: header.content_rect(),
                frame_byte_count: header.frame_byte_count(),
                received_at: now,
            };
        }

        // Duplicate fragments (UDP duplication) overwrite harmlessly.
        entry.fragments.insert(header.fragment_index(), payload.to_vec());
    }

    fn try_complete(&mut self, frame_number: u32) -> Option<AssembledFrame> {
        let entry = self.pending.get(&frame_number)?;
        if entry.fragments.len() < entry.total_fragments as usize {
            return None;
        }

        // INVARIANT: fragments.len() == total_fragments and every index is
        // < total_fragments (header validation), so each index is present.
        let Some(entry) = self.pending.remove(&frame_number) else {
            unreachable!("entry existence checked above");
        };

        let mut bytes = Vec::with_capacity(entry.frame_byte_count as usize);
        for index in 0..entry.total_fragments {
            match entry.fragments.get(&index) {
                Some(fragment) => bytes.extend_from_slice(fragment),
                None => {
                    // Forged headers can alias two fragmentations onto one
                    // frame number; treat the assembly as lost.
                    self.counters.dropped_frames += 1;
                    return None;
                },
            }
        }

        if bytes.len() != entry.frame_byte_count as usize {
            self.counters.dropped_frames += 1;
            tracing::trace!(stream = self.stream_id, frame = frame_number,
                "assembled length disagrees with frame byte count");
            return None;
        }

        self.deliver(AssembledFrame {
            stream_id: self.stream_id,
            frame_number,
            is_keyframe: entry.is_keyframe,
            timestamp_ns: entry.timestamp_ns,
            content_rect: entry.content_rect,
            bytes,
        })
    }

    /// Delivery policy: keyframes must advance past the last delivered
    /// keyframe; P-frames must advance past both watermarks.
    fn deliver(&mut self, frame: AssembledFrame) -> Option<AssembledFrame> {
        if frame.is_keyframe {
            if let Some(last_kf) = self.last_delivered_keyframe
                && !frame_is_newer(frame.frame_number, last_kf)
            {
                // Stale duplicate keyframe: already decoded this one.
                tracing::trace!(stream = self.stream_id, frame = frame.frame_number,
                    "dropping duplicate keyframe");
                return None;
            }

            self.last_delivered_keyframe = Some(frame.frame_number);
            // Never lower the completed watermark: a late-arriving large
            // keyframe must not re-admit P-frames behind newer deliveries.
            if self
                .last_completed_frame
                .is_none_or(|last| frame_is_newer(frame.frame_number, last))
            {
                self.last_completed_frame = Some(frame.frame_number);
            }
            self.awaiting_keyframe = false;
            self.awaiting_keyframe_since = None;
            self.purge_pending_pframes_below(frame.frame_number);
            self.counters.frames_delivered += 1;
            return Some(frame);
        }

        let past_completed =
            self.last_completed_frame.is_none_or(|last| frame_is_newer(frame.frame_number, last));
        let past_keyframe = self
            .last_delivered_keyframe
            .is_none_or(|last| frame_is_newer(frame.frame_number, last));
        if !past_completed || !past_keyframe {
            self.counters.dropped_frames += 1;
            return None;
        }

        self.last_completed_frame = Some(frame.frame_number);
        self.purge_pending_pframes_below(frame.frame_number);
        self.counters.frames_delivered += 1;
        Some(frame)
    }

    /// Drop pending P-frames older than `watermark`. Keyframes are never
    /// preempted: their tail fragments may still arrive.
    fn purge_pending_pframes_below(&mut self, watermark: u32) {
        let before = self.pending.len();
        self.pending
            .retain(|&number, frame| frame.is_keyframe || frame_is_newer(number, watermark));
        self.counters.dropped_frames += (before - self.pending.len()) as u64;
    }

    /// Drop every pending P-frame (discontinuity flush).
    fn purge_all_pending_pframes(&mut self) {
        let before = self.pending.len();
        self.pending.retain(|_, frame| frame.is_keyframe);
        self.counters.dropped_frames += (before - self.pending.len()) as u64;
    }

    /// Expire pending frames past their lifetime. Invoked on every packet.
    fn cleanup_old_frames(&mut self, now: I) {
        let pframe_timeout = self.config.pframe_timeout;
        let keyframe_timeout = self.config.keyframe_timeout;
        let before = self.pending.len();
        self.pending.retain(|_, frame| {
            let limit = if frame.is_keyframe { keyframe_timeout } else { pframe_timeout };
            now < frame.received_at || now - frame.received_at <= limit
        });
        self.counters.dropped_frames += (before - self.pending.len()) as u64;
    }

    fn set_awaiting_keyframe(&mut self, now: I) {
        if !self.awaiting_keyframe {
            self.awaiting_keyframe = true;
            self.awaiting_keyframe_since = Some(now);
        }
    }

    fn reset_for_epoch(&mut self, epoch: u16) {
        tracing::debug!(stream = self.stream_id, old = self.current_epoch, new = epoch,
            "epoch reset");
        let dropped = self.pending.len() as u64;
        self.counters.dropped_frames += dropped;
        self.pending.clear();
        self.current_epoch = epoch;
        // Numbering restarts with the new encoder session.
        self.last_completed_frame = None;
        self.last_delivered_keyframe = None;
    }
}
