//! Wire format for the Mirage streaming protocol.
//!
//! Two transports share this crate:
//!
//! - **Control channel** (TCP): length-prefixed [`ControlEnvelope`]s whose
//!   payloads are sorted-key JSON ([`payloads::ControlPayload`]). Key order is
//!   canonical because handshake signatures are computed over payload bytes.
//! - **Media channel** (UDP): fixed-size binary packet headers
//!   ([`MediaFrameHeader`], [`audio::AudioPacketHeader`],
//!   [`probe::ProbePacketHeader`]) transmitted in the clear, followed by an
//!   AEAD-sealed payload. Headers are little-endian and parsed zero-copy.
//!
//! Protocol logic lives elsewhere; this crate is serialization only.

pub mod audio;
pub mod canonical;
pub mod checksum;
pub mod envelope;
mod errors;
pub mod header;
pub mod payloads;
pub mod probe;

pub use envelope::{ControlEnvelope, EnvelopeDecoder};
pub use errors::{ProtocolError, Result};
pub use header::{ContentRect, MediaFlags, MediaFrameHeader};
pub use payloads::ControlPayload;

/// Bonjour service type advertised by hosts.
pub const SERVICE_TYPE: &str = "_mirage._tcp";

/// Default TCP control channel port.
pub const CONTROL_PORT: u16 = 9847;

/// Default UDP media data port.
pub const DATA_PORT: u16 = 9848;

/// Protocol version carried in hellos and the TXT record.
pub const PROTOCOL_VERSION: u32 = 1;

/// Magic prefix of a legacy UDP registration datagram
/// (`magic || device_id[16]`). ASCII "MQRG".
pub const REGISTRATION_MAGIC: u32 = 0x4D51_5247;

/// Size of the session registration token sent on the data port.
pub const REGISTRATION_TOKEN_LEN: usize = 32;

/// Control message discriminator carried in the envelope header.
///
/// Values are stable wire constants. Unknown values MUST be skipped by
/// receivers (forward compatibility), never treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlMessageType {
    /// Client handshake (signed).
    Hello = 0x0001,
    /// Host handshake response (signed).
    HelloResponse = 0x0002,
    /// Keepalive request.
    Ping = 0x0003,
    /// Keepalive response.
    Pong = 0x0004,
    /// Graceful disconnect.
    Goodbye = 0x0005,
    /// Pointer/key/stylus input for a stream.
    InputEvent = 0x0010,
    /// Request for the shareable window list.
    WindowListRequest = 0x0020,
    /// Shareable window list.
    WindowList = 0x0021,
    /// Host session state (active/locked/disconnected).
    SessionStateUpdate = 0x0030,
    /// Encoder reconfiguration for a live stream.
    EncoderSettingsChange = 0x0031,
    /// Client drawable geometry change.
    ResizeRequest = 0x0032,
    /// Host acknowledgement of a resize.
    ResizeAck = 0x0033,
    /// Client request for an urgent keyframe.
    KeyframeRequest = 0x0034,
    /// Start a staged bandwidth probe.
    QualityTestRequest = 0x0040,
    /// Probe results from the client accumulator.
    QualityTestResult = 0x0041,
    /// Audio stream lifecycle: started.
    AudioStreamStarted = 0x0050,
    /// Audio stream lifecycle: stopped.
    AudioStreamStopped = 0x0051,
}

impl ControlMessageType {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` for unrecognized types.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloResponse),
            0x0003 => Some(Self::Ping),
            0x0004 => Some(Self::Pong),
            0x0005 => Some(Self::Goodbye),
            0x0010 => Some(Self::InputEvent),
            0x0020 => Some(Self::WindowListRequest),
            0x0021 => Some(Self::WindowList),
            0x0030 => Some(Self::SessionStateUpdate),
            0x0031 => Some(Self::EncoderSettingsChange),
            0x0032 => Some(Self::ResizeRequest),
            0x0033 => Some(Self::ResizeAck),
            0x0034 => Some(Self::KeyframeRequest),
            0x0040 => Some(Self::QualityTestRequest),
            0x0041 => Some(Self::QualityTestResult),
            0x0050 => Some(Self::AudioStreamStarted),
            0x0051 => Some(Self::AudioStreamStopped),
            _ => None,
        }
    }
}
