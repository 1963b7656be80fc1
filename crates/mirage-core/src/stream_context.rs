//! Host-side per-stream context: keyframe recovery policy and FEC.
//!
//! Scheduled periodic keyframes are disabled in production (only startup
//! and recovery emit keyframes), so the recovery policy is the only path to
//! a fresh keyframe and its escalation behavior is load-bearing.
//!
//! # Escalation
//!
//! ```text
//!               request               request within 4 s
//! ┌────────┐  ───────────►  ┌──────┐  ─────────────────►  ┌──────┐
//! │  calm  │                │ soft │                      │ hard │
//! └────────┘  ◄───────────  └──────┘  ◄─────────────────  └──────┘
//!               4 s idle                 keyframe sent
//! ```
//!
//! Soft recovery: the next encoded frame is an urgent keyframe; no epoch
//! bump, no encoder reset, no P-frame FEC. Hard recovery: epoch increments,
//! the encoder is flushed and reinitialized, and P-frame parity turns on
//! until the recovery keyframe is fully sent.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use crate::{config::EncoderConfig, traits::EncodeDirective};

/// Window after a request within which a second request escalates to hard.
pub const HARD_ESCALATION_WINDOW: Duration = Duration::from_secs(4);

/// Parity block size for keyframes, whenever keyframes are sent.
pub const KEYFRAME_PARITY: u8 = 8;

/// Parity block size for P-frames during a hard recovery window.
pub const HARD_PFRAME_PARITY: u8 = 16;

/// Recovery mode of a pending keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Urgent keyframe only.
    Soft,
    /// Epoch bump + encoder flush/reset + P-frame FEC.
    Hard,
}

/// Instruction produced by a keyframe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDirective {
    /// Escalation level of this request.
    pub mode: RecoveryMode,
    /// Epoch the next keyframe (and all subsequent packets) must carry.
    pub epoch: u16,
    /// Encoder directive for the next frame.
    pub encode: EncodeDirective,
}

/// Per-stream host context.
#[derive(Debug)]
pub struct HostStreamContext<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    stream_id: u16,
    config: EncoderConfig,
    stream_scale: f64,
    dimension_token: u16,
    epoch: u16,
    soft_recovery_count: u64,
    hard_recovery_count: u64,
    last_recovery_request: Option<I>,
    keyframe_in_flight: bool,
    pending_requires_reset: bool,
    pending_requires_flush: bool,
    hard_window_active: bool,
}

impl<I> HostStreamContext<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a context for a freshly started stream.
    #[must_use]
    pub fn new(stream_id: u16, config: EncoderConfig, stream_scale: f64) -> Self {
        Self {
            stream_id,
            config,
            stream_scale,
            dimension_token: 0,
            epoch: 0,
            soft_recovery_count: 0,
            hard_recovery_count: 0,
            last_recovery_request: None,
            keyframe_in_flight: false,
            pending_requires_reset: false,
            pending_requires_flush: false,
            hard_window_active: false,
        }
    }

    /// Stream this context serves.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Current encoder configuration.
    #[must_use]
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Replace the encoder configuration (settings-change message).
    pub fn set_config(&mut self, config: EncoderConfig) {
        self.config = config;
    }

    /// Session-locked render scale.
    #[must_use]
    pub fn stream_scale(&self) -> f64 {
        self.stream_scale
    }

    /// Epoch all outgoing packets currently carry.
    #[must_use]
    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Token bound to the current encoded resolution.
    #[must_use]
    pub fn dimension_token(&self) -> u16 {
        self.dimension_token
    }

    /// Bind a new dimension token after an accepted resize. Keyframes carry
    /// it to receivers; stale P-frames are dropped against it.
    pub fn set_dimension_token(&mut self, token: u16) {
        self.dimension_token = token;
    }

    /// Soft recoveries since stream start.
    #[must_use]
    pub fn soft_recovery_count(&self) -> u64 {
        self.soft_recovery_count
    }

    /// Hard recoveries since stream start.
    #[must_use]
    pub fn hard_recovery_count(&self) -> u64 {
        self.hard_recovery_count
    }

    /// Whether the pending keyframe requires an encoder reset.
    #[must_use]
    pub fn pending_keyframe_requires_reset(&self) -> bool {
        self.pending_requires_reset
    }

    /// Whether the pending keyframe requires an encoder flush.
    #[must_use]
    pub fn pending_keyframe_requires_flush(&self) -> bool {
        self.pending_requires_flush
    }

    /// Scheduled periodic keyframes are disabled: only startup and recovery
    /// emit keyframes.
    #[must_use]
    pub fn should_queue_scheduled_keyframe(&self) -> bool {
        false
    }

    /// Handle a keyframe request from the client (or internal escalation).
    ///
    /// Returns `None` while a recovery keyframe is already in flight;
    /// duplicate requests are suppressed until it is fully sent. A request
    /// within [`HARD_ESCALATION_WINDOW`] of the previous one escalates to
    /// hard recovery.
    pub fn request_keyframe(&mut self, now: I) -> Option<RecoveryDirective> {
        if self.keyframe_in_flight {
            tracing::trace!(stream = self.stream_id, "keyframe already in flight");
            return None;
        }

        let escalate = self
            .last_recovery_request
            .is_some_and(|last| now >= last && now - last < HARD_ESCALATION_WINDOW);
        self.last_recovery_request = Some(now);
        self.keyframe_in_flight = true;

        let mode = if escalate {
            self.hard_recovery_count += 1;
            self.epoch = self.epoch.wrapping_add(1);
            self.pending_requires_reset = true;
            self.pending_requires_flush = true;
            self.hard_window_active = true;
            RecoveryMode::Hard
        } else {
            self.soft_recovery_count += 1;
            RecoveryMode::Soft
        };

        tracing::debug!(stream = self.stream_id, ?mode, epoch = self.epoch,
            "keyframe recovery requested");

        Some(RecoveryDirective {
            mode,
            epoch: self.epoch,
            encode: EncodeDirective {
                force_keyframe: true,
                requires_reset: self.pending_requires_reset,
                requires_flush: self.pending_requires_flush,
            },
        })
    }

    /// Force a hard recovery regardless of timing (capture restart
    /// escalation after repeated stalls).
    pub fn force_hard_recovery(&mut self, now: I) -> Option<RecoveryDirective> {
        if self.keyframe_in_flight {
            return None;
        }
        self.last_recovery_request = Some(now);
        self.keyframe_in_flight = true;
        self.hard_recovery_count += 1;
        self.epoch = self.epoch.wrapping_add(1);
        self.pending_requires_reset = true;
        self.pending_requires_flush = true;
        self.hard_window_active = true;

        Some(RecoveryDirective {
            mode: RecoveryMode::Hard,
            epoch: self.epoch,
            encode: EncodeDirective {
                force_keyframe: true,
                requires_reset: true,
                requires_flush: true,
            },
        })
    }

    /// The recovery keyframe left the sender completely.
    ///
    /// Clears the in-flight suppression, the pending reset/flush flags, and
    /// closes the hard-recovery FEC window.
    pub fn keyframe_sent(&mut self) {
        self.keyframe_in_flight = false;
        self.pending_requires_reset = false;
        self.pending_requires_flush = false;
        self.hard_window_active = false;
    }

    /// Parity block size for keyframe fragments.
    #[must_use]
    pub fn keyframe_parity(&self) -> u8 {
        KEYFRAME_PARITY
    }

    /// Parity block size for P-frame fragments: zero outside hard recovery.
    #[must_use]
    pub fn pframe_parity(&self) -> u8 {
        if self.hard_window_active { HARD_PFRAME_PARITY } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ms = Duration;

    fn at(ms: u64) -> Ms {
        Duration::from_millis(ms)
    }

    fn context() -> HostStreamContext<Ms> {
        HostStreamContext::new(1, EncoderConfig::default(), 1.0)
    }

    #[test]
    fn first_request_is_soft() {
        let mut ctx = context();
        let directive = ctx.request_keyframe(at(0)).unwrap();
        assert_eq!(directive.mode, RecoveryMode::Soft);
        assert_eq!(directive.epoch, 0);
        assert!(directive.encode.force_keyframe);
        assert!(!directive.encode.requires_reset);
        assert!(!directive.encode.requires_flush);
        assert_eq!(ctx.soft_recovery_count(), 1);
        assert_eq!(ctx.hard_recovery_count(), 0);
        assert_eq!(ctx.pframe_parity(), 0);
        assert_eq!(ctx.keyframe_parity(), 8);
    }

    #[test]
    fn second_request_within_window_escalates_exactly_once() {
        let mut ctx = context();
        ctx.request_keyframe(at(0)).unwrap();
        ctx.keyframe_sent();

        // 1.1 s later: inside the 4 s window.
        let directive = ctx.request_keyframe(at(1_100)).unwrap();
        assert_eq!(directive.mode, RecoveryMode::Hard);
        assert_eq!(ctx.soft_recovery_count(), 1);
        assert_eq!(ctx.hard_recovery_count(), 1);
        assert!(ctx.pending_keyframe_requires_reset());
        assert!(ctx.pending_keyframe_requires_flush());
        assert_eq!(directive.epoch, 1);
        assert_eq!(ctx.pframe_parity(), 16);
    }

    #[test]
    fn request_after_idle_window_stays_soft() {
        let mut ctx = context();
        ctx.request_keyframe(at(0)).unwrap();
        ctx.keyframe_sent();

        let directive = ctx.request_keyframe(at(4_500)).unwrap();
        assert_eq!(directive.mode, RecoveryMode::Soft);
        assert_eq!(ctx.soft_recovery_count(), 2);
        assert_eq!(ctx.hard_recovery_count(), 0);
        assert_eq!(ctx.epoch(), 0);
    }

    #[test]
    fn in_flight_keyframe_suppresses_duplicates() {
        let mut ctx = context();
        ctx.request_keyframe(at(0)).unwrap();
        assert_eq!(ctx.request_keyframe(at(100)), None);
        assert_eq!(ctx.request_keyframe(at(200)), None);
        assert_eq!(ctx.soft_recovery_count(), 1);

        ctx.keyframe_sent();
        assert!(ctx.request_keyframe(at(300)).is_some());
    }

    #[test]
    fn keyframe_sent_closes_hard_window_and_clears_flags() {
        let mut ctx = context();
        ctx.request_keyframe(at(0)).unwrap();
        ctx.keyframe_sent();
        ctx.request_keyframe(at(1_000)).unwrap(); // hard
        assert_eq!(ctx.pframe_parity(), 16);

        ctx.keyframe_sent();
        assert_eq!(ctx.pframe_parity(), 0);
        assert!(!ctx.pending_keyframe_requires_reset());
        assert!(!ctx.pending_keyframe_requires_flush());
    }

    #[test]
    fn forced_hard_recovery_skips_the_window() {
        let mut ctx = context();
        let directive = ctx.force_hard_recovery(at(0)).unwrap();
        assert_eq!(directive.mode, RecoveryMode::Hard);
        assert_eq!(ctx.hard_recovery_count(), 1);
        assert_eq!(ctx.epoch(), 1);
    }

    #[test]
    fn scheduled_keyframes_are_disabled() {
        assert!(!context().should_queue_scheduled_keyframe());
    }

    #[test]
    fn epoch_wraps_without_panicking() {
        let mut ctx = context();
        for _ in 0..70_000u32 {
            ctx.force_hard_recovery(at(0));
            ctx.keyframe_sent();
        }
        // 70k hard recoveries wrapped the 16-bit epoch.
        assert_eq!(ctx.hard_recovery_count(), 70_000);
        assert_eq!(ctx.epoch(), (70_000 % 65_536) as u16);
    }
}
