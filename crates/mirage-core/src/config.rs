//! Stream and encoder configuration.
//!
//! Defaults follow the recognized options table: IPv6-safe packet size,
//! 60 Hz, NV12/sRGB, balanced latency, automatic quality.

use std::time::Duration;

use mirage_proto::payloads::stream::{ColorSpace, LatencyMode, PixelFormat, QualityMode};

/// IPv6 minimum MTU (1280) minus IPv6 (40) and UDP (8) headers.
///
/// A datagram this size survives any conforming IPv6 path without
/// fragmentation; IPv4 paths with larger MTUs can raise the configured
/// value.
pub const IPV6_SAFE_PACKET_SIZE: usize = 1232;

/// Per-stream transport configuration, fixed at stream start.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Bound on header + sealed payload per datagram.
    pub max_packet_size: usize,
    /// Client-chosen render scale; locked for the session.
    pub stream_scale: f64,
    /// P-frame reassembly lifetime.
    pub pframe_timeout: Duration,
    /// Keyframe reassembly lifetime; large keyframes span many datagrams.
    pub keyframe_timeout: Duration,
    /// Mute host-local audio while streaming.
    pub mute_local_audio_while_streaming: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_packet_size: IPV6_SAFE_PACKET_SIZE,
            stream_scale: 1.0,
            pframe_timeout: Duration::from_millis(500),
            keyframe_timeout: Duration::from_secs(4),
            mute_local_audio_while_streaming: false,
        }
    }
}

/// Encoder configuration for one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    /// Encoded width in pixels (even).
    pub width: u32,
    /// Encoded height in pixels (even).
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,
    /// Target frame rate (60 or 120).
    pub target_frame_rate: u32,
    /// Capture/encode pixel format.
    pub pixel_format: PixelFormat,
    /// Encoded color space.
    pub color_space: ColorSpace,
    /// Scheduled keyframe interval in frames; 0 disables scheduling, which
    /// is the production setting: only startup and recovery emit keyframes.
    pub keyframe_interval: u32,
    /// Encoder latency preference.
    pub latency_mode: LatencyMode,
    /// Whether the host may adapt parameters on degradation.
    pub quality_mode: QualityMode,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 2560,
            height: 1440,
            bitrate_bps: 40_000_000,
            target_frame_rate: 60,
            pixel_format: PixelFormat::Nv12,
            color_space: ColorSpace::Srgb,
            keyframe_interval: 0,
            latency_mode: LatencyMode::Balanced,
            quality_mode: QualityMode::Automatic,
        }
    }
}
