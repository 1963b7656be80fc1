//! Pure protocol logic for the Mirage streaming data plane.
//!
//! Everything in this crate follows the action pattern: state machines take
//! time as a method parameter and return actions or values for a driver to
//! execute. No I/O happens here; the `mirage-client` and `mirage-host`
//! crates wrap these machines with tokio transports. This keeps every
//! admission rule, timeout, and escalation deterministic under test.
//!
//! # Components
//!
//! - [`reassembler`]: per-stream fragment reassembly with epoch, dimension
//!   token, CRC, and staleness admission
//! - [`stream_controller`] / [`resize`]: client-side frame ordering, decode
//!   recovery, input blocking, and the resize pipeline
//! - [`stream_context`] / [`quality`]: host-side keyframe recovery
//!   escalation, FEC policy, and bitrate→quality mapping
//! - [`send_budget`]: fragment sizing, queued-byte backpressure, capture
//!   restart pacing, encoder in-flight gating
//! - [`display`]: the shared virtual display manager
//! - [`probe`]: staged bandwidth test scheduling and evaluation
//! - [`handshake`]: the signed Hello v2 exchange for both roles
//! - [`grace`]: the control-channel transient-error grace window
//! - [`traits`]: capture/encode/decode seams implemented by platform
//!   adapters and test doubles

pub mod config;
pub mod display;
mod error;
pub mod grace;
pub mod handshake;
pub mod probe;
pub mod quality;
pub mod reassembler;
pub mod resize;
pub mod send_budget;
pub mod stream_context;
pub mod stream_controller;
pub mod traits;

pub use config::{EncoderConfig, StreamConfig};
pub use error::{DisplayError, HandshakeError, StreamError};
pub use reassembler::{AssembledFrame, FrameReassembler, ReassemblerConfig};
pub use stream_controller::{StreamController, StreamHealth};
