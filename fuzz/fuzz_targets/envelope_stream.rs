//! Fuzz target for control envelope extraction.
//!
//! Feeds arbitrary bytes in arbitrary chunk sizes through the streaming
//! decoder.
//!
//! # Invariants
//!
//! - Extraction NEVER panics regardless of chunking
//! - Hostile length fields are rejected without allocation
//! - A framing error is sticky for the test: once alignment is lost the
//!   stream is torn down, so we stop feeding

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mirage_proto::{ControlPayload, EnvelopeDecoder};

#[derive(Debug, Arbitrary)]
struct Input {
    bytes: Vec<u8>,
    chunk: u8,
}

fuzz_target!(|input: Input| {
    let chunk = (input.chunk as usize).max(1);
    let mut decoder = EnvelopeDecoder::new();

    'outer: for piece in input.bytes.chunks(chunk) {
        decoder.extend(piece);
        loop {
            match decoder.next_envelope() {
                Ok(Some(envelope)) => {
                    // Payload decoding must be total as well.
                    let _ = ControlPayload::from_envelope(&envelope);
                },
                Ok(None) => break,
                Err(_) => break 'outer,
            }
        }
    }
});
