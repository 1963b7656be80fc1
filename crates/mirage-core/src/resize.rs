//! Client resize pipeline.
//!
//! The renderer reports drawable geometry; this pipeline decides when that
//! becomes a resize request to the host. The very first layout is absorbed
//! silently (the stream was configured with it). Afterwards a change must
//! clear a noise threshold (aspect or scale delta above 0.01, or an actual
//! pixel-size change after capping and even-alignment) to publish.
//!
//! Published requests move the state to awaiting; a lost acknowledgement
//! self-resets to idle after a timeout so a dropped control message cannot
//! wedge resizing forever.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use mirage_proto::payloads::stream::ResizeRequest;

/// Hard cap on requested pixel dimensions (5K Retina).
pub const MAX_PIXEL_WIDTH: u32 = 5120;
/// Hard cap on requested pixel height.
pub const MAX_PIXEL_HEIGHT: u32 = 2880;

/// Threshold below which aspect/scale changes are treated as noise.
const DELTA_THRESHOLD: f64 = 0.01;

/// Geometry reported by the renderer on layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInput {
    /// Drawable width in pixels.
    pub pixel_width: u32,
    /// Drawable height in pixels.
    pub pixel_height: u32,
    /// Drawable area in points.
    pub drawable_point_area: f64,
    /// Full screen area in points.
    pub screen_point_area: f64,
}

/// Resize pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeState {
    /// No resize in flight.
    Idle,
    /// Request published; waiting for the host acknowledgement.
    Awaiting {
        /// Token the acknowledgement must carry.
        token: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PublishedTarget {
    width: u32,
    height: u32,
    aspect: f64,
    relative_scale: f64,
}

/// Per-stream resize pipeline.
#[derive(Debug)]
pub struct ResizePipeline<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    stream_id: u16,
    ack_timeout: Duration,
    state: ResizeState,
    awaiting_since: Option<I>,
    published: Option<PublishedTarget>,
    next_token: u16,
}

/// Cap to the pixel limits preserving aspect, then align down to even
/// dimensions for the encoder.
#[must_use]
pub fn capped_even_dimensions(width: u32, height: u32) -> (u32, u32) {
    let width = width.max(2);
    let height = height.max(2);

    let scale = f64::min(
        f64::from(MAX_PIXEL_WIDTH) / f64::from(width),
        f64::from(MAX_PIXEL_HEIGHT) / f64::from(height),
    )
    .min(1.0);

    let scaled_w = ((f64::from(width) * scale).round() as u32).min(MAX_PIXEL_WIDTH);
    let scaled_h = ((f64::from(height) * scale).round() as u32).min(MAX_PIXEL_HEIGHT);
    ((scaled_w & !1).max(2), (scaled_h & !1).max(2))
}

impl<I> ResizePipeline<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a pipeline for one stream.
    #[must_use]
    pub fn new(stream_id: u16, ack_timeout: Duration) -> Self {
        Self {
            stream_id,
            ack_timeout,
            state: ResizeState::Idle,
            awaiting_since: None,
            published: None,
            next_token: 1,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResizeState {
        self.state
    }

    /// Handle a layout report. Returns a request when the change clears the
    /// noise thresholds; the first layout never publishes.
    pub fn on_layout(&mut self, input: LayoutInput, now: I) -> Option<ResizeRequest> {
        self.tick(now);

        let (width, height) = capped_even_dimensions(input.pixel_width, input.pixel_height);
        let aspect = f64::from(width) / f64::from(height);
        let relative_scale = if input.screen_point_area > 0.0 {
            (input.drawable_point_area / input.screen_point_area).min(1.0)
        } else {
            1.0
        };
        let target = PublishedTarget { width, height, aspect, relative_scale };

        let Some(previous) = self.published else {
            // First layout configured the stream; absorb it.
            self.published = Some(target);
            return None;
        };

        let aspect_delta = (target.aspect - previous.aspect).abs();
        let scale_delta = (target.relative_scale - previous.relative_scale).abs();
        let size_changed = target.width != previous.width || target.height != previous.height;
        if aspect_delta <= DELTA_THRESHOLD && scale_delta <= DELTA_THRESHOLD && !size_changed {
            return None;
        }

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.published = Some(target);
        self.state = ResizeState::Awaiting { token };
        self.awaiting_since = Some(now);
        tracing::debug!(stream = self.stream_id, width, height, token, "publishing resize");

        Some(ResizeRequest {
            stream_id: self.stream_id,
            pixel_width: width,
            pixel_height: height,
            relative_scale,
            dimension_token: token,
        })
    }

    /// Handle the host acknowledgement.
    pub fn on_ack(&mut self, token: u16) {
        if self.state == (ResizeState::Awaiting { token }) {
            self.state = ResizeState::Idle;
            self.awaiting_since = None;
        }
    }

    /// Self-reset when the acknowledgement is lost.
    pub fn tick(&mut self, now: I) {
        if let ResizeState::Awaiting { token } = self.state
            && let Some(since) = self.awaiting_since
            && now >= since
            && now - since > self.ack_timeout
        {
            tracing::debug!(stream = self.stream_id, token, "resize ack lost, resetting");
            self.state = ResizeState::Idle;
            self.awaiting_since = None;
        }
    }
}
