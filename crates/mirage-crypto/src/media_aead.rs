//! Per-packet media encryption with ChaCha20-Poly1305.
//!
//! Every UDP payload is sealed independently under the session key with a
//! deterministic 12-byte nonce built from cleartext header fields:
//!
//! ```text
//! byte 0:      1                      (nonce version)
//! byte 1:      direction              (1 = host→client, 2 = client→host)
//! byte 2:      media kind             (1 = video, 2 = audio)
//! byte 3:      epoch low byte (video) | 0 (audio)
//! bytes 4-5:   stream_id  (u16 LE)
//! bytes 6-9:   sequence   (u32 LE)
//! bytes 10-11: fragment   (u16 LE)
//! ```
//!
//! Associated data is empty: the header already determines the nonce, so
//! tampering with any nonce-contributing field makes `open` fail. Wire
//! payload is `ciphertext || 16-byte tag`. Open failures are silent drops
//! on the receive path: bump a counter, never an error bubble.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{
    errors::{CryptoError, Result},
    session::SessionKey,
};

/// Nonce version byte.
const NONCE_VERSION: u8 = 1;

/// Poly1305 tag size appended to every sealed payload.
pub const TAG_SIZE: usize = 16;

/// Direction of a media packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Host encodes and sends; the common case.
    HostToClient = 1,
    /// Client sends (reverse audio, future camera return).
    ClientToHost = 2,
}

/// Media kind of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaKind {
    /// Video fragments; the epoch byte participates in the nonce.
    Video = 1,
    /// Audio fragments; the epoch byte is zero.
    Audio = 2,
}

/// Nonce-contributing fields read from a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketContext {
    /// Media kind.
    pub kind: MediaKind,
    /// Recovery epoch; only the low byte enters the nonce, and only for
    /// video. Audio headers carry no epoch.
    pub epoch: u16,
    /// Stream identifier.
    pub stream_id: u16,
    /// Packet sequence number.
    pub sequence: u32,
    /// Fragment index.
    pub fragment_index: u16,
}

fn build_nonce(direction: Direction, ctx: &PacketContext) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = NONCE_VERSION;
    nonce[1] = direction as u8;
    nonce[2] = ctx.kind as u8;
    nonce[3] = match ctx.kind {
        MediaKind::Video => (ctx.epoch & 0xFF) as u8,
        MediaKind::Audio => 0,
    };
    nonce[4..6].copy_from_slice(&ctx.stream_id.to_le_bytes());
    nonce[6..10].copy_from_slice(&ctx.sequence.to_le_bytes());
    nonce[10..12].copy_from_slice(&ctx.fragment_index.to_le_bytes());
    nonce
}

/// Sealing/opening cipher bound to a session key and send direction.
///
/// One instance per session per direction; the receive side constructs its
/// cipher with the *sender's* direction so nonces match.
pub struct MediaCipher {
    cipher: ChaCha20Poly1305,
    direction: Direction,
}

impl MediaCipher {
    /// Create a cipher for packets flowing in `direction`.
    #[must_use]
    pub fn new(key: &SessionKey, direction: Direction) -> Self {
        Self { cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())), direction }
    }

    /// Direction this cipher seals for.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Seal a fragment payload. Returns `ciphertext || tag`.
    #[must_use]
    pub fn seal(&self, ctx: &PacketContext, plaintext: &[u8]) -> Vec<u8> {
        let nonce = build_nonce(self.direction, ctx);
        let Ok(sealed) = self.cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
            unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };
        sealed
    }

    /// Open a sealed fragment payload.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::DecryptFailed`] on truncation (< 16 bytes), a bad
    ///   tag, or header fields that disagree with the sealed nonce
    pub fn open(&self, ctx: &PacketContext, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptFailed);
        }
        let nonce = build_nonce(self.direction, ctx);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for MediaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCipher").field("direction", &self.direction).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_key() -> SessionKey {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        SessionKey::from_bytes(bytes)
    }

    fn video_ctx() -> PacketContext {
        PacketContext {
            kind: MediaKind::Video,
            epoch: 3,
            stream_id: 1,
            sequence: 100,
            fragment_index: 0,
        }
    }

    #[test]
    fn seal_open_round_trip() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        let plaintext = b"encoded hevc fragment bytes";
        let sealed = cipher.seal(&video_ctx(), plaintext);
        assert_eq!(sealed.len(), plaintext.len() + TAG_SIZE);
        assert_eq!(cipher.open(&video_ctx(), &sealed).unwrap(), plaintext);
    }

    #[test]
    fn truncated_payload_fails_cleanly() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        assert_eq!(cipher.open(&video_ctx(), &[0u8; 15]), Err(CryptoError::DecryptFailed));
        assert_eq!(cipher.open(&video_ctx(), &[]), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        let mut sealed = cipher.seal(&video_ctx(), b"payload");
        sealed[0] ^= 0x01;
        assert_eq!(cipher.open(&video_ctx(), &sealed), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_tag_fails() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        let mut sealed = cipher.seal(&video_ctx(), b"payload");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert_eq!(cipher.open(&video_ctx(), &sealed), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn any_nonce_field_mismatch_fails() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        let sealed = cipher.seal(&video_ctx(), b"payload");

        let mutations: [&dyn Fn(&mut PacketContext); 4] = [
            &|c| c.epoch ^= 1,
            &|c| c.stream_id ^= 1,
            &|c| c.sequence ^= 1,
            &|c| c.fragment_index ^= 1,
        ];
        for mutate in mutations {
            let mut ctx = video_ctx();
            mutate(&mut ctx);
            assert_eq!(cipher.open(&ctx, &sealed), Err(CryptoError::DecryptFailed));
        }
    }

    #[test]
    fn direction_mismatch_fails() {
        let key = test_key();
        let host = MediaCipher::new(&key, Direction::HostToClient);
        let client_view = MediaCipher::new(&key, Direction::ClientToHost);
        let sealed = host.seal(&video_ctx(), b"payload");
        assert!(client_view.open(&video_ctx(), &sealed).is_err());
    }

    #[test]
    fn audio_nonce_ignores_epoch() {
        let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
        let mut ctx = video_ctx();
        ctx.kind = MediaKind::Audio;
        let sealed = cipher.seal(&ctx, b"opus frame");

        // Audio headers have no epoch; a receiver reconstructing the context
        // with any epoch value must still open the packet.
        let mut receiver_ctx = ctx;
        receiver_ctx.epoch = 0xFFFF;
        assert_eq!(cipher.open(&receiver_ctx, &sealed).unwrap(), b"opus frame");
    }

    #[test]
    fn nonce_structure() {
        let nonce = build_nonce(
            Direction::HostToClient,
            &PacketContext {
                kind: MediaKind::Video,
                epoch: 0x0102,
                stream_id: 0x0304,
                sequence: 0x0506_0708,
                fragment_index: 0x090A,
            },
        );
        assert_eq!(nonce[0], 1); // version
        assert_eq!(nonce[1], 1); // direction
        assert_eq!(nonce[2], 1); // kind
        assert_eq!(nonce[3], 0x02); // epoch low byte
        assert_eq!(&nonce[4..6], &[0x04, 0x03]); // stream_id LE
        assert_eq!(&nonce[6..10], &[0x08, 0x07, 0x06, 0x05]); // sequence LE
        assert_eq!(&nonce[10..12], &[0x0A, 0x09]); // fragment LE
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_packets(
            plaintext in prop::collection::vec(any::<u8>(), 0..2048),
            epoch in any::<u16>(),
            stream_id in any::<u16>(),
            sequence in any::<u32>(),
            fragment_index in any::<u16>(),
        ) {
            let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
            let ctx = PacketContext {
                kind: MediaKind::Video,
                epoch,
                stream_id,
                sequence,
                fragment_index,
            };
            let sealed = cipher.seal(&ctx, &plaintext);
            prop_assert_eq!(cipher.open(&ctx, &sealed).unwrap(), plaintext);
        }

        #[test]
        fn single_bit_flip_anywhere_fails(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            index_seed in any::<prop::sample::Index>(),
            bit in 0usize..8,
        ) {
            let cipher = MediaCipher::new(&test_key(), Direction::HostToClient);
            let ctx = video_ctx();
            let mut sealed = cipher.seal(&ctx, &plaintext);
            let index = index_seed.index(sealed.len());
            sealed[index] ^= 1 << bit;
            prop_assert_eq!(cipher.open(&ctx, &sealed), Err(CryptoError::DecryptFailed));
        }
    }
}
