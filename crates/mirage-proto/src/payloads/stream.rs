//! Stream lifecycle and configuration payloads.

use serde::{Deserialize, Serialize};

/// Pixel format of the capture/encode pipeline.
///
/// The 4:4:4 variants are never auto-negotiated; they appear only when a
/// client explicitly selects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    /// 8-bit BGRA.
    Bgra8,
    /// 10-bit BGR with 2-bit alpha.
    Bgr10a2,
    /// 8-bit 4:2:0 biplanar.
    Nv12,
    /// 10-bit 4:2:0 biplanar.
    P010,
    /// 8-bit 4:4:4 (explicit selection only).
    Yuv444,
    /// 10-bit 4:4:4 (explicit selection only).
    Yuv444_10,
}

/// Color space of the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    /// sRGB.
    Srgb,
    /// Display P3.
    DisplayP3,
}

/// Encoder latency preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatencyMode {
    /// Balance latency against quality.
    Balanced,
    /// Minimize latency at quality cost.
    Lowest,
}

/// Whether the host may adapt parameters on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityMode {
    /// Host adjusts bitrate/quality in response to degradation.
    Automatic,
    /// Client-pinned parameters; the host never adjusts them.
    Custom,
}

/// Request for the shareable window list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowListRequest {
    /// Include minimized windows.
    #[serde(default)]
    pub include_minimized: bool,
}

/// One shareable window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    /// Platform window identifier.
    pub window_id: u32,
    /// Window title.
    pub title: String,
    /// Owning application name.
    pub app_name: String,
    /// Current width in pixels.
    pub width: u32,
    /// Current height in pixels.
    pub height: u32,
}

/// Shareable window list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowList {
    /// Windows available for streaming.
    pub windows: Vec<WindowInfo>,
}

/// Encoder reconfiguration for a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSettingsChange {
    /// Target stream.
    pub stream_id: u16,
    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,
    /// Target frame rate (60 or 120).
    pub target_frame_rate: u32,
    /// Pixel format.
    pub pixel_format: PixelFormat,
    /// Color space.
    pub color_space: ColorSpace,
    /// Keyframe interval in frames; 0 disables scheduled keyframes.
    pub keyframe_interval: u32,
    /// Latency preference.
    pub latency_mode: LatencyMode,
    /// Automatic or client-pinned quality.
    pub quality_mode: QualityMode,
}

/// Client drawable geometry change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
    /// Target stream.
    pub stream_id: u16,
    /// Requested pixel width (even, capped).
    pub pixel_width: u32,
    /// Requested pixel height (even, capped).
    pub pixel_height: u32,
    /// min(1, drawable point area / screen point area).
    pub relative_scale: f64,
    /// Token the client expects subsequent keyframes to carry.
    pub dimension_token: u16,
}

/// Host acknowledgement of a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeAck {
    /// Acknowledged stream.
    pub stream_id: u16,
    /// Token now bound to the encoder output.
    pub dimension_token: u16,
}

/// Client request for an urgent keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeRequest {
    /// Stream needing recovery.
    pub stream_id: u16,
}

/// Audio stream started notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamStarted {
    /// Audio stream identifier.
    pub stream_id: u16,
    /// Codec name ("opus", "aac", "lpcm").
    pub codec: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channel_count: u16,
    /// Samples per packetized frame.
    pub samples_per_frame: u16,
}

/// Audio stream stopped notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamStopped {
    /// Audio stream identifier.
    pub stream_id: u16,
}
