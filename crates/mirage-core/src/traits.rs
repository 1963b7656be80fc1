//! Platform seams: capture, encode, decode.
//!
//! CGVirtualDisplay, ScreenCaptureKit, and VideoToolbox equivalents live
//! behind these traits. The core never links a platform framework; the test
//! suite drives everything through in-memory doubles.

use async_trait::async_trait;
use bytes::Bytes;
use mirage_proto::{ContentRect, payloads::stream::PixelFormat};
use thiserror::Error;

use crate::config::EncoderConfig;

/// A raw captured frame handed to the encoder.
///
/// The buffer is read-only after ingress; capture adapters that pool
/// buffers must not recycle one until the encoder future resolves.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub pixel_format: PixelFormat,
    /// Capture timestamp, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Raw pixel data.
    pub data: Bytes,
}

/// Per-frame instruction from the stream context to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeDirective {
    /// Force this frame to be an urgent keyframe.
    pub force_keyframe: bool,
    /// Reinitialize the encoder session before encoding (hard recovery).
    pub requires_reset: bool,
    /// Flush in-flight frames before encoding (hard recovery).
    pub requires_flush: bool,
}

/// An encoded frame ready for fragmentation and sealing.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// HEVC bitstream bytes.
    pub bytes: Bytes,
    /// Whether this is a keyframe (carries parameter sets).
    pub is_keyframe: bool,
    /// Presentation timestamp, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Non-padded pixel region.
    pub content_rect: ContentRect,
}

/// Capture failure surfaced to the stream service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The capture session died and needs a restart.
    #[error("capture session stopped: {0}")]
    SessionStopped(String),
    /// The capture target (window, display) is gone.
    #[error("capture target disappeared")]
    TargetGone,
}

/// Encoder failure surfaced to the stream service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Hardware encode session error; triggers recovery.
    #[error("encode session error: {0}")]
    Session(String),
    /// Configuration was rejected by the hardware.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// Decoder failure surfaced to the stream controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Hardware decode session error; triggers keyframe-only mode.
    #[error("decode session error: {0}")]
    Session(String),
    /// Stream dimensions changed; the decoder needs a keyframe with new
    /// parameter sets.
    #[error("awaiting dimension change")]
    AwaitingDimensionChange,
}

/// Source of captured frames (virtual display or window capture).
#[async_trait]
pub trait CaptureSource: Send {
    /// Await the next captured frame.
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError>;

    /// Request a capture restart after a stall. Pacing is the caller's job
    /// (see [`crate::send_budget::CaptureRestartPacer`]).
    async fn restart(&mut self) -> Result<(), CaptureError>;
}

/// Hardware video encoder seam.
#[async_trait]
pub trait VideoEncoder: Send {
    /// Encode one frame under the given directive.
    async fn encode(
        &mut self,
        frame: CapturedFrame,
        directive: EncodeDirective,
    ) -> Result<EncodedFrame, EncodeError>;

    /// Apply a new configuration to the session.
    async fn reconfigure(&mut self, config: &EncoderConfig) -> Result<(), EncodeError>;
}

/// Hardware video decoder seam.
#[async_trait]
pub trait VideoDecoder: Send {
    /// Decode one assembled frame; rendering is the adapter's concern.
    async fn decode(&mut self, frame: crate::reassembler::AssembledFrame)
    -> Result<(), DecodeError>;
}
