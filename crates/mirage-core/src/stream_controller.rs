//! Client-side stream controller.
//!
//! Sits between the reassembler and the decoder: forwards assembled frames,
//! turns decoder faults into recovery, and gates input while the picture
//! cannot be trusted. Pure state machine; the client glue executes the
//! returned actions (decode dispatch, keyframe requests over control,
//! input-blocked set updates).
//!
//! # Recovery loop
//!
//! On a decode error or dimension stall the controller blocks input, puts
//! the reassembler into keyframe-only mode, and requests a keyframe. While
//! recovery is active it re-requests at intervals equal to the keyframe
//! timeout, never more often, until a keyframe delivers.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use crate::reassembler::AssembledFrame;

/// User-visible stream health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    /// Frames flowing, decoder happy.
    Ok,
    /// Losses or pong timeouts observed; picture still moving.
    Degraded,
    /// Waiting on a recovery keyframe; input blocked.
    Recovering,
    /// Transport considers the stream gone.
    Lost,
}

/// Actions for the client glue to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerAction {
    /// Hand this frame to the decoder task.
    ForwardToDecoder(AssembledFrame),
    /// Send a keyframe request for this stream on the control channel.
    RequestKeyframe,
    /// Put the reassembler into keyframe-only mode.
    EnterKeyframeOnlyMode,
    /// Add the stream to the input-blocked set.
    BlockInput,
    /// Remove the stream from the input-blocked set.
    UnblockInput,
    /// Publish a health change to the UI layer.
    PublishHealth(StreamHealth),
}

/// Per-stream controller state machine.
#[derive(Debug)]
pub struct StreamController<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    stream_id: u16,
    recovery_interval: Duration,
    health: StreamHealth,
    recovering: bool,
    input_blocked: bool,
    has_received_first_frame: bool,
    last_keyframe_request: Option<I>,
}

impl<I> StreamController<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a controller; `recovery_interval` is the keyframe timeout.
    #[must_use]
    pub fn new(stream_id: u16, recovery_interval: Duration) -> Self {
        Self {
            stream_id,
            recovery_interval,
            health: StreamHealth::Ok,
            recovering: false,
            input_blocked: false,
            has_received_first_frame: false,
            last_keyframe_request: None,
        }
    }

    /// Stream this controller serves.
    #[must_use]
    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> StreamHealth {
        self.health
    }

    /// Whether input for this stream is suppressed.
    #[must_use]
    pub fn input_blocked(&self) -> bool {
        self.input_blocked
    }

    /// Whether the first frame has arrived (gates UI readiness).
    #[must_use]
    pub fn has_received_first_frame(&self) -> bool {
        self.has_received_first_frame
    }

    /// Handle a frame from the reassembler.
    ///
    /// Ordering is the reassembler's guarantee; the controller forwards
    /// unconditionally and uses keyframes to close recovery.
    pub fn on_frame_assembled(&mut self, frame: AssembledFrame, _now: I) -> Vec<ControllerAction> {
        let mut actions = Vec::with_capacity(4);

        if !self.has_received_first_frame {
            self.has_received_first_frame = true;
        }

        if frame.is_keyframe && self.recovering {
            self.recovering = false;
            self.input_blocked = false;
            self.last_keyframe_request = None;
            actions.push(ControllerAction::UnblockInput);
            self.set_health(StreamHealth::Ok, &mut actions);
            tracing::debug!(stream = self.stream_id, frame = frame.frame_number,
                "recovery keyframe delivered");
        }

        actions.push(ControllerAction::ForwardToDecoder(frame));
        actions
    }

    /// Handle a decoder fault (session error or dimension stall).
    ///
    /// Idempotent while recovery is active: repeated faults do not re-issue
    /// requests faster than the recovery interval.
    pub fn on_decoder_fault(&mut self, now: I) -> Vec<ControllerAction> {
        let mut actions = Vec::with_capacity(5);

        if !self.recovering {
            self.recovering = true;
            self.input_blocked = true;
            actions.push(ControllerAction::EnterKeyframeOnlyMode);
            actions.push(ControllerAction::BlockInput);
            self.set_health(StreamHealth::Recovering, &mut actions);
        }

        if self.request_due(now) {
            self.last_keyframe_request = Some(now);
            actions.push(ControllerAction::RequestKeyframe);
        }

        actions
    }

    /// Periodic tick from the recovery loop task.
    ///
    /// Re-requests a keyframe when one interval has elapsed without
    /// delivery; no-op outside recovery.
    pub fn tick(&mut self, now: I) -> Vec<ControllerAction> {
        if !self.recovering || !self.request_due(now) {
            return Vec::new();
        }
        self.last_keyframe_request = Some(now);
        vec![ControllerAction::RequestKeyframe]
    }

    /// Note a missed pong deadline; degrades health without recovery.
    pub fn on_pong_timeout(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::with_capacity(1);
        if self.health == StreamHealth::Ok {
            self.set_health(StreamHealth::Degraded, &mut actions);
        }
        actions
    }

    /// Note a pong arriving on time; restores health if merely degraded.
    pub fn on_pong_ok(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::with_capacity(1);
        if self.health == StreamHealth::Degraded {
            self.set_health(StreamHealth::Ok, &mut actions);
        }
        actions
    }

    /// Transport declared the stream gone.
    pub fn on_transport_lost(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::with_capacity(2);
        if !self.input_blocked {
            self.input_blocked = true;
            actions.push(ControllerAction::BlockInput);
        }
        self.set_health(StreamHealth::Lost, &mut actions);
        actions
    }

    fn request_due(&self, now: I) -> bool {
        match self.last_keyframe_request {
            None => true,
            Some(last) => now >= last && now - last >= self.recovery_interval,
        }
    }

    fn set_health(&mut self, health: StreamHealth, actions: &mut Vec<ControllerAction>) {
        if self.health != health {
            self.health = health;
            actions.push(ControllerAction::PublishHealth(health));
        }
    }
}

#[cfg(test)]
mod tests {
    use mirage_proto::ContentRect;

    use super::*;

    type Ms = Duration;

    fn at(ms: u64) -> Ms {
        Duration::from_millis(ms)
    }

    fn controller() -> StreamController<Ms> {
        StreamController::new(1, Duration::from_secs(4))
    }

    fn frame(number: u32, keyframe: bool) -> AssembledFrame {
        AssembledFrame {
            stream_id: 1,
            frame_number: number,
            is_keyframe: keyframe,
            timestamp_ns: u64::from(number) * 16_666_667,
            content_rect: ContentRect::default(),
            bytes: vec![0u8; 64],
        }
    }

    fn has_request(actions: &[ControllerAction]) -> bool {
        actions.contains(&ControllerAction::RequestKeyframe)
    }

    #[test]
    fn first_frame_flips_readiness_and_forwards() {
        let mut c = controller();
        assert!(!c.has_received_first_frame());
        let actions = c.on_frame_assembled(frame(1, true), at(0));
        assert!(c.has_received_first_frame());
        assert!(matches!(actions.last(), Some(ControllerAction::ForwardToDecoder(f)) if f.frame_number == 1));
    }

    #[test]
    fn decoder_fault_starts_recovery_once() {
        let mut c = controller();
        let actions = c.on_decoder_fault(at(0));
        assert!(actions.contains(&ControllerAction::EnterKeyframeOnlyMode));
        assert!(actions.contains(&ControllerAction::BlockInput));
        assert!(actions.contains(&ControllerAction::PublishHealth(StreamHealth::Recovering)));
        assert!(has_request(&actions));
        assert!(c.input_blocked());

        // A second fault right after re-requests nothing.
        let actions = c.on_decoder_fault(at(100));
        assert!(actions.is_empty());
    }

    #[test]
    fn recovery_rerequests_at_keyframe_timeout_cadence() {
        let mut c = controller();
        c.on_decoder_fault(at(0));

        assert!(c.tick(at(2_000)).is_empty(), "below the interval");
        assert!(has_request(&c.tick(at(4_000))), "one interval elapsed");
        assert!(c.tick(at(5_000)).is_empty(), "not yet another interval");
        assert!(has_request(&c.tick(at(8_000))));
    }

    #[test]
    fn keyframe_delivery_closes_recovery_and_unblocks_input() {
        let mut c = controller();
        c.on_decoder_fault(at(0));
        assert_eq!(c.health(), StreamHealth::Recovering);

        let actions = c.on_frame_assembled(frame(10, true), at(500));
        assert!(actions.contains(&ControllerAction::UnblockInput));
        assert!(actions.contains(&ControllerAction::PublishHealth(StreamHealth::Ok)));
        assert!(!c.input_blocked());

        // Recovery over: ticks are silent again.
        assert!(c.tick(at(10_000)).is_empty());
    }

    #[test]
    fn pframes_do_not_close_recovery() {
        let mut c = controller();
        c.on_decoder_fault(at(0));
        let actions = c.on_frame_assembled(frame(5, false), at(100));
        assert!(!actions.contains(&ControllerAction::UnblockInput));
        assert_eq!(c.health(), StreamHealth::Recovering);
    }

    #[test]
    fn pong_timeouts_degrade_and_recover_health() {
        let mut c = controller();
        let actions = c.on_pong_timeout();
        assert!(actions.contains(&ControllerAction::PublishHealth(StreamHealth::Degraded)));
        assert!(c.on_pong_timeout().is_empty(), "already degraded");

        let actions = c.on_pong_ok();
        assert!(actions.contains(&ControllerAction::PublishHealth(StreamHealth::Ok)));
    }

    #[test]
    fn pong_timeout_does_not_override_recovery() {
        let mut c = controller();
        c.on_decoder_fault(at(0));
        assert!(c.on_pong_timeout().is_empty());
        assert_eq!(c.health(), StreamHealth::Recovering);
    }

    #[test]
    fn transport_loss_blocks_input_and_publishes_lost() {
        let mut c = controller();
        let actions = c.on_transport_lost();
        assert!(actions.contains(&ControllerAction::BlockInput));
        assert!(actions.contains(&ControllerAction::PublishHealth(StreamHealth::Lost)));
    }
}
