//! Session management payloads: the signed hello exchange, session state,
//! and graceful disconnect.
//!
//! Hello and its response carry detached ECDSA signatures computed over a
//! canonical `key=value` rendering of their fields (built in the crypto
//! layer, not here). Binary fields travel as strings: public keys and
//! signatures Base64, nonces lowercase hex.

use serde::{Deserialize, Serialize};

/// Capability advertisement inside the hello exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Maximum concurrent streams the device supports.
    pub max_streams: u32,
    /// HEVC decode/encode support.
    pub hevc: bool,
    /// Display P3 color support.
    pub p3: bool,
    /// Maximum frame rate (60 or 120).
    pub max_fps: u32,
}

/// Transport/codec negotiation inside the hello exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    /// Protocol version the sender speaks.
    pub protocol_version: u32,
    /// Preferred pixel format name.
    pub preferred_pixel_format: super::stream::PixelFormat,
    /// Preferred color space.
    pub color_space: super::stream::ColorSpace,
}

/// Signed client handshake (version 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloV2 {
    /// Stable device identifier.
    pub device_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Device class ("mac", "ipad", ...).
    pub device_type: String,
    /// Protocol version.
    pub protocol_version: u32,
    /// Capability advertisement.
    pub capabilities: Capabilities,
    /// Codec/transport negotiation.
    pub negotiation: Negotiation,
    /// Optional cloud account binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icloud_user_id: Option<String>,
    /// Lowercase hex SHA-256 of the signing public key.
    pub key_id: String,
    /// Base64 SEC1 P-256 public key.
    pub public_key: String,
    /// Sender wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// 128-bit replay nonce, lowercase hex.
    pub nonce: String,
    /// Base64 DER ECDSA signature over the canonical payload.
    pub signature: String,
}

/// Signed host handshake response (version 2).
///
/// `request_nonce` echoes the hello's nonce to bind the exchange. The UDP
/// registration token is inside the signed body: a verifier that accepts the
/// response has also authenticated the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponseV2 {
    /// Whether the host accepted the hello.
    pub accepted: bool,
    /// Rejection reason code when not accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<u32>,
    /// Whether an out-of-band trust approval is still pending.
    pub requires_auth: bool,
    /// Echo of the client's hello nonce, lowercase hex.
    pub request_nonce: String,
    /// Host device identifier.
    pub host_id: String,
    /// Lowercase hex SHA-256 of the host signing public key.
    pub key_id: String,
    /// Base64 SEC1 P-256 public key.
    pub public_key: String,
    /// Host wall clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Host 128-bit nonce, lowercase hex.
    pub nonce: String,
    /// Base64 32-byte UDP registration token; present iff accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_registration_token: Option<String>,
    /// Base64 DER ECDSA signature over the canonical payload.
    pub signature: String,
}

/// Host session state visible to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Streaming normally.
    Active,
    /// Host screen is locked; streams pause.
    Locked,
    /// Session is gone.
    Disconnected,
}

/// Session state change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateUpdate {
    /// New state.
    pub state: SessionState,
}

/// Graceful disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goodbye {
    /// Human-readable reason.
    pub reason: String,
}
