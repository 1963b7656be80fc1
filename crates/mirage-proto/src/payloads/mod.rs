//! Typed control channel messages.
//!
//! Envelope headers are raw binary; payloads are sorted-key JSON for
//! signature stability and forward compatibility (unknown fields are
//! ignored, unknown types are skipped). The [`ControlPayload`] enum covers
//! every recognized message; the envelope's type field, not a JSON tag,
//! selects the variant.
//!
//! # Invariants
//!
//! - Each variant maps to exactly one [`ControlMessageType`] (exhaustive
//!   match in [`ControlPayload::message_type`]).
//! - Encoding a payload and decoding it under the same type yields an equal
//!   value.

pub mod input;
pub mod quality;
pub mod session;
pub mod stream;

use crate::{
    ControlMessageType,
    canonical::{canonical_json, from_json},
    envelope::ControlEnvelope,
    errors::{ProtocolError, Result},
};

/// All recognized control messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPayload {
    /// Client handshake (signed).
    Hello(session::HelloV2),
    /// Host handshake response (signed).
    HelloResponse(session::HelloResponseV2),
    /// Keepalive request.
    Ping,
    /// Keepalive response.
    Pong,
    /// Graceful disconnect.
    Goodbye(session::Goodbye),
    /// Pointer/key/stylus input for a stream.
    InputEvent(input::InputEvent),
    /// Request for the shareable window list.
    WindowListRequest(stream::WindowListRequest),
    /// Shareable window list.
    WindowList(stream::WindowList),
    /// Host session state change.
    SessionStateUpdate(session::SessionStateUpdate),
    /// Encoder reconfiguration for a live stream.
    EncoderSettingsChange(stream::EncoderSettingsChange),
    /// Client drawable geometry change.
    ResizeRequest(stream::ResizeRequest),
    /// Host acknowledgement of a resize.
    ResizeAck(stream::ResizeAck),
    /// Client request for an urgent keyframe.
    KeyframeRequest(stream::KeyframeRequest),
    /// Start a staged bandwidth probe.
    QualityTestRequest(quality::QualityTestRequest),
    /// Probe results from the client accumulator.
    QualityTestResult(quality::QualityTestResult),
    /// Audio stream lifecycle: started.
    AudioStreamStarted(stream::AudioStreamStarted),
    /// Audio stream lifecycle: stopped.
    AudioStreamStopped(stream::AudioStreamStopped),
}

impl ControlPayload {
    /// Message type corresponding to this payload.
    #[must_use]
    pub const fn message_type(&self) -> ControlMessageType {
        match self {
            Self::Hello(_) => ControlMessageType::Hello,
            Self::HelloResponse(_) => ControlMessageType::HelloResponse,
            Self::Ping => ControlMessageType::Ping,
            Self::Pong => ControlMessageType::Pong,
            Self::Goodbye(_) => ControlMessageType::Goodbye,
            Self::InputEvent(_) => ControlMessageType::InputEvent,
            Self::WindowListRequest(_) => ControlMessageType::WindowListRequest,
            Self::WindowList(_) => ControlMessageType::WindowList,
            Self::SessionStateUpdate(_) => ControlMessageType::SessionStateUpdate,
            Self::EncoderSettingsChange(_) => ControlMessageType::EncoderSettingsChange,
            Self::ResizeRequest(_) => ControlMessageType::ResizeRequest,
            Self::ResizeAck(_) => ControlMessageType::ResizeAck,
            Self::KeyframeRequest(_) => ControlMessageType::KeyframeRequest,
            Self::QualityTestRequest(_) => ControlMessageType::QualityTestRequest,
            Self::QualityTestResult(_) => ControlMessageType::QualityTestResult,
            Self::AudioStreamStarted(_) => ControlMessageType::AudioStreamStarted,
            Self::AudioStreamStopped(_) => ControlMessageType::AudioStreamStopped,
        }
    }

    /// Encode the payload as canonical sorted-key JSON bytes.
    ///
    /// Ping and pong are zero-byte payloads.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::JsonEncode`] on serialization failure
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::Ping | Self::Pong => Ok(Vec::new()),
            Self::Hello(inner) => canonical_json(inner),
            Self::HelloResponse(inner) => canonical_json(inner),
            Self::Goodbye(inner) => canonical_json(inner),
            Self::InputEvent(inner) => canonical_json(inner),
            Self::WindowListRequest(inner) => canonical_json(inner),
            Self::WindowList(inner) => canonical_json(inner),
            Self::SessionStateUpdate(inner) => canonical_json(inner),
            Self::EncoderSettingsChange(inner) => canonical_json(inner),
            Self::ResizeRequest(inner) => canonical_json(inner),
            Self::ResizeAck(inner) => canonical_json(inner),
            Self::KeyframeRequest(inner) => canonical_json(inner),
            Self::QualityTestRequest(inner) => canonical_json(inner),
            Self::QualityTestResult(inner) => canonical_json(inner),
            Self::AudioStreamStarted(inner) => canonical_json(inner),
            Self::AudioStreamStopped(inner) => canonical_json(inner),
        }
    }

    /// Decode a payload for a known message type.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::JsonDecode`] on malformed payload bytes
    pub fn decode(message_type: ControlMessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match message_type {
            ControlMessageType::Hello => Self::Hello(from_json(bytes)?),
            ControlMessageType::HelloResponse => Self::HelloResponse(from_json(bytes)?),
            ControlMessageType::Ping => Self::Ping,
            ControlMessageType::Pong => Self::Pong,
            ControlMessageType::Goodbye => Self::Goodbye(from_json(bytes)?),
            ControlMessageType::InputEvent => Self::InputEvent(from_json(bytes)?),
            ControlMessageType::WindowListRequest => Self::WindowListRequest(from_json(bytes)?),
            ControlMessageType::WindowList => Self::WindowList(from_json(bytes)?),
            ControlMessageType::SessionStateUpdate => Self::SessionStateUpdate(from_json(bytes)?),
            ControlMessageType::EncoderSettingsChange => {
                Self::EncoderSettingsChange(from_json(bytes)?)
            },
            ControlMessageType::ResizeRequest => Self::ResizeRequest(from_json(bytes)?),
            ControlMessageType::ResizeAck => Self::ResizeAck(from_json(bytes)?),
            ControlMessageType::KeyframeRequest => Self::KeyframeRequest(from_json(bytes)?),
            ControlMessageType::QualityTestRequest => Self::QualityTestRequest(from_json(bytes)?),
            ControlMessageType::QualityTestResult => Self::QualityTestResult(from_json(bytes)?),
            ControlMessageType::AudioStreamStarted => Self::AudioStreamStarted(from_json(bytes)?),
            ControlMessageType::AudioStreamStopped => Self::AudioStreamStopped(from_json(bytes)?),
        })
    }

    /// Wrap the payload in a transport envelope.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::JsonEncode`] on serialization failure
    pub fn into_envelope(self) -> Result<ControlEnvelope> {
        let bytes = self.encode()?;
        Ok(ControlEnvelope::new(self.message_type().to_u16(), bytes))
    }

    /// Parse a payload from a transport envelope.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownType`] for unrecognized types; callers skip
    ///   these with a log line, never disconnect
    /// - [`ProtocolError::JsonDecode`] on malformed payload bytes
    pub fn from_envelope(envelope: &ControlEnvelope) -> Result<Self> {
        let message_type = ControlMessageType::from_u16(envelope.message_type)
            .ok_or(ProtocolError::UnknownType(envelope.message_type))?;
        Self::decode(message_type, &envelope.payload)
    }
}
