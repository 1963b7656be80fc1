//! Per-stream encode task.
//!
//! Owns the capture source and encoder for one stream. Recovery directives
//! arrive from the control path and apply to the next encoded frame; the
//! capture restart pacer watches for stalls and escalates to hard recovery
//! when restarts stop helping.

use std::{sync::Arc, time::Instant};

use mirage_core::{
    config::EncoderConfig,
    send_budget::{CaptureKind, CaptureRestartPacer, EncoderInflightGate, PacerDecision, SendBudget},
    stream_context::HostStreamContext,
    traits::{CaptureSource, EncodeDirective, EncodedFrame, VideoEncoder},
};
use tokio::{
    sync::{Mutex, mpsc},
    time::Duration,
};

/// Control-path commands into an encode task.
#[derive(Debug)]
pub(crate) enum StreamCommand {
    /// Apply a recovery directive to the next encoded frame.
    Encode(EncodeDirective),
    /// Reconfigure the encoder session.
    Reconfigure(EncoderConfig),
}

/// Wiring for one stream's encode task.
pub(crate) struct EncodeTask {
    /// Capture source (virtual display or window).
    pub capture: Box<dyn CaptureSource>,
    /// Hardware encoder seam.
    pub encoder: Box<dyn VideoEncoder>,
    /// Capture kind for stall thresholds.
    pub capture_kind: CaptureKind,
    /// Stream context shared with the control path and sender.
    pub context: Arc<Mutex<HostStreamContext<Instant>>>,
    /// Shared queued-byte accounting.
    pub budget: Arc<Mutex<SendBudget>>,
    /// Encoded frames to the sender task.
    pub frames: mpsc::Sender<EncodedFrame>,
    /// Recovery directives from the control path.
    pub directives: mpsc::Receiver<StreamCommand>,
}

/// Run the encode loop until capture ends or the sender goes away.
pub(crate) async fn run_encode(mut task: EncodeTask) {
    let (frame_rate, stream_id) = {
        let context = task.context.lock().await;
        (context.config().target_frame_rate, context.stream_id())
    };
    let mut gate = EncoderInflightGate::new(frame_rate);
    let mut pacer: CaptureRestartPacer<Instant> =
        CaptureRestartPacer::new(task.capture_kind, frame_rate);
    let mut pending = EncodeDirective::default();
    let mut stall_check = tokio::time::interval(Duration::from_millis(500));

    // Startup keyframe: the first encoded frame must carry parameter sets.
    pending.force_keyframe = true;

    loop {
        tokio::select! {
            command = task.directives.recv() => {
                match command {
                    Some(StreamCommand::Encode(directive)) => {
                        pending.force_keyframe |= directive.force_keyframe;
                        pending.requires_reset |= directive.requires_reset;
                        pending.requires_flush |= directive.requires_flush;
                    },
                    Some(StreamCommand::Reconfigure(config)) => {
                        if let Err(err) = task.encoder.reconfigure(&config).await {
                            tracing::warn!(%err, stream = stream_id, "encoder reconfigure failed");
                        }
                    },
                    None => break,
                }
            },
            captured = task.capture.next_frame() => {
                let captured = match captured {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(%err, stream = stream_id, "capture failed");
                        continue;
                    },
                };
                let now = Instant::now();
                pacer.note_frame(now);

                if !gate.try_begin() {
                    // Encoder saturated; this capture frame is stale by the
                    // time a slot frees, so drop it.
                    continue;
                }
                let directive = std::mem::take(&mut pending);
                let encoded = task.encoder.encode(captured, directive).await;
                gate.complete();

                match encoded {
                    Ok(frame) => {
                        let admitted = task.budget.lock().await.admit(frame.bytes.len());
                        if admitted {
                            if task.frames.send(frame).await.is_err() {
                                break;
                            }
                        } else if frame.is_keyframe {
                            // A dropped keyframe must not leave the receiver
                            // waiting forever; re-arm the request.
                            pending.force_keyframe = true;
                        }
                    },
                    Err(err) => {
                        tracing::warn!(%err, stream = stream_id, "encode failed");
                        let mut context = task.context.lock().await;
                        if let Some(recovery) = context.request_keyframe(Instant::now()) {
                            pending.force_keyframe |= recovery.encode.force_keyframe;
                            pending.requires_reset |= recovery.encode.requires_reset;
                            pending.requires_flush |= recovery.encode.requires_flush;
                        }
                    },
                }
            },
            _ = stall_check.tick() => {
                match pacer.check(Instant::now()) {
                    PacerDecision::Wait => {},
                    PacerDecision::Restart => {
                        tracing::info!(stream = stream_id, "restarting stalled capture");
                        if let Err(err) = task.capture.restart().await {
                            tracing::warn!(%err, stream = stream_id, "capture restart failed");
                        }
                    },
                    PacerDecision::EscalateHardRecovery => {
                        let mut context = task.context.lock().await;
                        if let Some(recovery) = context.force_hard_recovery(Instant::now()) {
                            pending.force_keyframe |= recovery.encode.force_keyframe;
                            pending.requires_reset |= recovery.encode.requires_reset;
                            pending.requires_flush |= recovery.encode.requires_flush;
                        }
                    },
                }
            },
        }
    }
    tracing::debug!(stream = stream_id, "encode task exiting");
}
