//! Events surfaced to the embedding application.

use mirage_core::{StreamHealth, reassembler::AssembledFrame};
use mirage_proto::{ControlPayload, audio::AudioCodec};

/// Everything the client surfaces to its embedder.
///
/// Media events carry decodable payloads; control events carry messages the
/// library does not consume itself (window lists, session state, probe
/// results). The embedder drives decoders and rendering.
#[derive(Debug)]
pub enum ClientEvent {
    /// A video frame completed reassembly; feed it to the decoder.
    FrameAssembled(AssembledFrame),

    /// A verified audio packet arrived.
    AudioPacket {
        /// Audio stream identifier.
        stream_id: u16,
        /// Codec of the payload, if recognized.
        codec: Option<AudioCodec>,
        /// Presentation timestamp, nanoseconds.
        timestamp_ns: u64,
        /// Decrypted, checksum-verified payload.
        payload: Vec<u8>,
    },

    /// A control message the library does not consume internally.
    Control(ControlPayload),

    /// Stream health changed.
    HealthChanged {
        /// Affected stream.
        stream_id: u16,
        /// New health.
        health: StreamHealth,
    },

    /// Input suppression toggled for a stream.
    InputBlockChanged {
        /// Affected stream.
        stream_id: u16,
        /// Whether input is now blocked.
        blocked: bool,
    },

    /// The connection ended.
    Disconnected {
        /// Human-readable reason.
        reason: String,
    },
}
