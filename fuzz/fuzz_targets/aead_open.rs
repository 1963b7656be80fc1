//! Fuzz target for media AEAD open.
//!
//! # Invariants
//!
//! - `open` NEVER panics on arbitrary sealed bytes or contexts
//! - A successful open on non-sealed input is cryptographically impossible
//!   for payloads with a real tag; mutated seals always fail

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mirage_crypto::{
    MediaCipher, SessionKey,
    media_aead::{Direction, MediaKind, PacketContext},
};

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    epoch: u16,
    stream_id: u16,
    sequence: u32,
    fragment_index: u16,
    audio: bool,
    sealed: Vec<u8>,
    flip_bit: Option<(u16, u8)>,
}

fuzz_target!(|input: Input| {
    let cipher = MediaCipher::new(&SessionKey::from_bytes(input.key), Direction::HostToClient);
    let ctx = PacketContext {
        kind: if input.audio { MediaKind::Audio } else { MediaKind::Video },
        epoch: input.epoch,
        stream_id: input.stream_id,
        sequence: input.sequence,
        fragment_index: input.fragment_index,
    };

    // Arbitrary bytes never panic, and essentially never authenticate.
    let _ = cipher.open(&ctx, &input.sealed);

    // A genuine seal round-trips; any single-bit mutation fails.
    let sealed = cipher.seal(&ctx, &input.sealed);
    assert_eq!(cipher.open(&ctx, &sealed).as_deref(), Ok(&input.sealed[..]));

    if let Some((index, bit)) = input.flip_bit {
        let mut mutated = sealed;
        let at = (index as usize) % mutated.len();
        mutated[at] ^= 1 << (bit % 8);
        assert!(cipher.open(&ctx, &mutated).is_err());
    }
});
