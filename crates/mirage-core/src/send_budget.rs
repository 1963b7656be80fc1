//! Sender-side budgets: fragment sizing, queued-byte backpressure, capture
//! restart pacing, and the encoder in-flight gate.
//!
//! The sender never queues deeply. When queued bytes exceed a threshold
//! that scales with encoded area × frame rate, incoming frames are dropped
//! at the producer. A dropped frame costs one frame of staleness; a queued
//! frame costs latency on every frame behind it.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use mirage_proto::MediaFrameHeader;

use crate::error::StreamError;

/// AEAD tag appended to every fragment payload.
const TAG_SIZE: usize = 16;

/// Fragment geometry for one configured packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSizing {
    max_packet_size: usize,
}

impl FragmentSizing {
    /// Create a sizing for `max_packet_size`, which bounds header +
    /// ciphertext + tag per datagram.
    ///
    /// # Errors
    ///
    /// - [`StreamError::PacketSizeTooSmall`] if no payload byte would fit
    pub fn new(max_packet_size: usize) -> Result<Self, StreamError> {
        let min = MediaFrameHeader::SIZE + TAG_SIZE + 1;
        if max_packet_size < min {
            return Err(StreamError::PacketSizeTooSmall { size: max_packet_size, min });
        }
        Ok(Self { max_packet_size })
    }

    /// Plaintext bytes each fragment may carry.
    #[must_use]
    pub fn max_fragment_payload(&self) -> usize {
        self.max_packet_size - MediaFrameHeader::SIZE - TAG_SIZE
    }

    /// Number of fragments a frame of `frame_len` bytes needs.
    #[must_use]
    pub fn fragment_count(&self, frame_len: usize) -> usize {
        frame_len.div_ceil(self.max_fragment_payload()).max(1)
    }

    /// Byte range of fragment `index` within a frame of `frame_len`.
    #[must_use]
    pub fn fragment_range(&self, frame_len: usize, index: usize) -> std::ops::Range<usize> {
        let chunk = self.max_fragment_payload();
        let start = (index * chunk).min(frame_len);
        let end = ((index + 1) * chunk).min(frame_len);
        start..end
    }
}

/// Queued-byte accounting with producer-side drop.
///
/// The threshold scales with encoded area × frame rate: a faster, larger
/// stream drains more bytes per unit time, so it may hold more in flight
/// before queuing means the socket has stopped draining.
#[derive(Debug)]
pub struct SendBudget {
    queued_bytes: usize,
    threshold_bytes: usize,
    dropped_frames: u64,
}

impl SendBudget {
    /// Lower bound on the drop threshold.
    pub const MIN_THRESHOLD: usize = 256 * 1024;

    /// Upper bound on the drop threshold.
    pub const MAX_THRESHOLD: usize = 16 * 1024 * 1024;

    /// Create a budget for the given encode geometry.
    #[must_use]
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            queued_bytes: 0,
            threshold_bytes: Self::threshold_for(width, height, frame_rate),
            dropped_frames: 0,
        }
    }

    /// Threshold for an encode geometry: pixel rate / 400 bytes (a few
    /// hundred KB at HD/60, a couple of MB at 5K), clamped to
    /// `[MIN_THRESHOLD, MAX_THRESHOLD]`.
    #[must_use]
    pub fn threshold_for(width: u32, height: u32, frame_rate: u32) -> usize {
        let pixel_rate =
            width as usize * height as usize * frame_rate.max(1) as usize;
        (pixel_rate / 400).clamp(Self::MIN_THRESHOLD, Self::MAX_THRESHOLD)
    }

    /// Recompute the threshold after a resize or rate change.
    pub fn reconfigure(&mut self, width: u32, height: u32, frame_rate: u32) {
        self.threshold_bytes = Self::threshold_for(width, height, frame_rate);
    }

    /// Whether a frame of `frame_len` bytes may enter the queue.
    ///
    /// Returns false and counts a drop when the queue is above threshold.
    pub fn admit(&mut self, frame_len: usize) -> bool {
        if self.queued_bytes > self.threshold_bytes {
            self.dropped_frames += 1;
            tracing::trace!(queued = self.queued_bytes, frame_len, "backpressure frame drop");
            return false;
        }
        true
    }

    /// Account bytes handed to the socket queue.
    pub fn on_queued(&mut self, bytes: usize) {
        self.queued_bytes += bytes;
    }

    /// Account bytes the socket reported sent.
    pub fn on_sent(&mut self, bytes: usize) {
        self.queued_bytes = self.queued_bytes.saturating_sub(bytes);
    }

    /// Bytes currently queued.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Frames dropped by backpressure.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

/// Capture target kind; stall thresholds differ by an order of magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Full-display capture; frames arrive continuously.
    Display,
    /// Window capture; idle windows legitimately go quiet.
    Window,
}

impl CaptureKind {
    /// Stall floor for this capture kind.
    #[must_use]
    pub fn stall_floor(self) -> Duration {
        match self {
            Self::Display => Duration::from_millis(1_500),
            Self::Window => Duration::from_secs(8),
        }
    }

    /// Stall threshold at a frame rate: the floor, or ~90 missed frame
    /// intervals, whichever is larger.
    #[must_use]
    pub fn stall_threshold(self, frame_rate: u32) -> Duration {
        let interval_based = Duration::from_secs_f64(90.0 / f64::from(frame_rate.max(1)));
        self.stall_floor().max(interval_based)
    }
}

/// Outcome of a stall check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerDecision {
    /// Capture is healthy or the cooldown has not elapsed.
    Wait,
    /// Request a capture restart.
    Restart,
    /// Three consecutive restarts failed to stabilize; escalate the next
    /// keyframe to hard recovery.
    EscalateHardRecovery,
}

/// Exponential restart pacing for a stalling capture source.
///
/// Base cooldown 3 s, doubling per consecutive restart, capped at 18 s.
/// A 20 s stable window resets the streak.
#[derive(Debug)]
pub struct CaptureRestartPacer<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    kind: CaptureKind,
    frame_rate: u32,
    last_frame: Option<I>,
    last_restart: Option<I>,
    consecutive_restarts: u32,
}

impl<I> CaptureRestartPacer<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Base restart cooldown.
    pub const BASE_COOLDOWN: Duration = Duration::from_secs(3);

    /// Cooldown cap.
    pub const MAX_COOLDOWN: Duration = Duration::from_secs(18);

    /// Stable window that resets the restart streak.
    pub const STABLE_WINDOW: Duration = Duration::from_secs(20);

    /// Consecutive restarts that trigger hard-recovery escalation.
    pub const ESCALATION_STREAK: u32 = 3;

    /// Create a pacer for one capture source.
    #[must_use]
    pub fn new(kind: CaptureKind, frame_rate: u32) -> Self {
        Self { kind, frame_rate, last_frame: None, last_restart: None, consecutive_restarts: 0 }
    }

    /// Record a captured frame; a stable window since the last restart
    /// clears the streak.
    pub fn note_frame(&mut self, now: I) {
        self.last_frame = Some(now);
        if let Some(restart) = self.last_restart
            && now >= restart
            && now - restart >= Self::STABLE_WINDOW
        {
            self.consecutive_restarts = 0;
            self.last_restart = None;
        }
    }

    /// Check for a stall and decide what to do about it.
    pub fn check(&mut self, now: I) -> PacerDecision {
        let Some(last_frame) = self.last_frame else {
            // Nothing captured yet; startup is not a stall.
            return PacerDecision::Wait;
        };

        let threshold = self.kind.stall_threshold(self.frame_rate);
        if now < last_frame || now - last_frame < threshold {
            return PacerDecision::Wait;
        }

        if let Some(last_restart) = self.last_restart
            && now >= last_restart
            && now - last_restart < self.current_cooldown()
        {
            return PacerDecision::Wait;
        }

        self.consecutive_restarts += 1;
        self.last_restart = Some(now);

        if self.consecutive_restarts > Self::ESCALATION_STREAK {
            tracing::warn!(kind = ?self.kind, streak = self.consecutive_restarts,
                "capture restarts not converging, escalating");
            PacerDecision::EscalateHardRecovery
        } else {
            PacerDecision::Restart
        }
    }

    /// Restarts in the current streak.
    #[must_use]
    pub fn consecutive_restarts(&self) -> u32 {
        self.consecutive_restarts
    }

    fn current_cooldown(&self) -> Duration {
        let doublings = self.consecutive_restarts.saturating_sub(1).min(8);
        (Self::BASE_COOLDOWN * 2u32.pow(doublings)).min(Self::MAX_COOLDOWN)
    }
}

/// Encoder in-flight cap: 1 frame at 60 Hz, 2 at 120 Hz.
///
/// Completion of the previous encode unblocks the next; the gate never
/// queues, it tells the caller to drop the capture frame instead.
#[derive(Debug)]
pub struct EncoderInflightGate {
    cap: usize,
    in_flight: usize,
}

impl EncoderInflightGate {
    /// Create a gate for the target frame rate.
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        Self { cap: if frame_rate >= 120 { 2 } else { 1 }, in_flight: 0 }
    }

    /// Try to start an encode; false means drop this capture frame.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight >= self.cap {
            return false;
        }
        self.in_flight += 1;
        true
    }

    /// An encode completed.
    pub fn complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Encodes currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}
