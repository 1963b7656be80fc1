//! Input event payloads.
//!
//! Input events bypass the coordination queue on both ends (a dedicated
//! low-latency path), so this payload stays flat and small. Stylus data is
//! optional: legacy senders omit the field entirely and it decodes as
//! `None`.

use serde::{Deserialize, Serialize};

/// Kind of input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputEventKind {
    /// Pointer moved.
    PointerMove,
    /// Pointer button pressed.
    PointerDown,
    /// Pointer button released.
    PointerUp,
    /// Scroll wheel / trackpad scroll.
    Scroll,
    /// Key pressed.
    KeyDown,
    /// Key released.
    KeyUp,
}

/// Stylus sample attached to pointer events from pencil-capable devices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylusSample {
    /// Altitude angle in radians (π/2 = perpendicular).
    pub altitude: f64,
    /// Azimuth angle in radians.
    pub azimuth: f64,
    /// Tilt along the X axis, -1..1.
    pub tilt_x: f64,
    /// Tilt along the Y axis, -1..1.
    pub tilt_y: f64,
    /// Normalized pressure, 0..1.
    pub pressure: f64,
}

/// A single input event targeting a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    /// Target stream.
    pub stream_id: u16,
    /// Event kind.
    pub kind: InputEventKind,
    /// X in stream pixel coordinates.
    pub x: f64,
    /// Y in stream pixel coordinates.
    pub y: f64,
    /// Pressed button mask (pointer events).
    #[serde(default)]
    pub buttons: u32,
    /// Scroll delta X (scroll events).
    #[serde(default)]
    pub delta_x: f64,
    /// Scroll delta Y (scroll events).
    #[serde(default)]
    pub delta_y: f64,
    /// Platform key code (key events).
    #[serde(default)]
    pub key_code: u32,
    /// Modifier mask (shift/ctrl/alt/cmd).
    #[serde(default)]
    pub modifiers: u32,
    /// Stylus sample, absent for mouse/trackpad and legacy senders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylus: Option<StylusSample>,
}
