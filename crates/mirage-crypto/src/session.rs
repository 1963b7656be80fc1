//! Media session establishment.
//!
//! Both sides derive the same 32-byte session key from the signed hello
//! exchange:
//!
//! ```text
//! salt = SHA-256(canonical{clientID, clientKeyID, clientNonce,
//!                          hostID, hostKeyID, hostNonce,
//!                          type="media-key-derivation-v1"})
//! key  = HKDF-SHA256(ikm = ECDH(localPriv, peerPub), salt,
//!                    info = "mirage-media-session-v1", L = 32)
//! ```
//!
//! The derivation is deterministic in its inputs; mismatched hellos yield
//! mismatched keys and every media packet fails to open. This module also
//! owns hello replay protection and the UDP registration token.

use std::collections::HashMap;

use hkdf::Hkdf;
use p256::{ecdh, ecdsa::VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    canonical::CanonicalPayload,
    errors::{CryptoError, Result},
    identity::DeviceIdentity,
};

/// HKDF info label for media session keys.
const SESSION_INFO: &[u8] = b"mirage-media-session-v1";

/// Type tag mixed into the derivation salt.
const DERIVATION_TYPE: &str = "media-key-derivation-v1";

/// Default hello timestamp acceptance window (±60 s).
pub const DEFAULT_REPLAY_WINDOW_MS: u64 = 60_000;

/// 32-byte media session key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw bytes (test vectors and key stores).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.write_str("SessionKey(..)")
    }
}

/// Identity fields both sides feed into the derivation salt.
///
/// Nonces are the lowercase-hex renderings from the hello exchange; using
/// the wire strings directly means there is no second decode step to
/// disagree on.
#[derive(Debug, Clone)]
pub struct DerivationInputs {
    /// Client device identifier.
    pub client_id: String,
    /// Client key ID.
    pub client_key_id: String,
    /// Client hello nonce (lowercase hex).
    pub client_nonce: String,
    /// Host device identifier.
    pub host_id: String,
    /// Host key ID.
    pub host_key_id: String,
    /// Host response nonce (lowercase hex).
    pub host_nonce: String,
}

impl DerivationInputs {
    fn salt(&self) -> [u8; 32] {
        let canonical = CanonicalPayload::new()
            .field("clientID", self.client_id.clone())
            .field("clientKeyID", self.client_key_id.clone())
            .field("clientNonce", self.client_nonce.clone())
            .field("hostID", self.host_id.clone())
            .field("hostKeyID", self.host_key_id.clone())
            .field("hostNonce", self.host_nonce.clone())
            .field("type", DERIVATION_TYPE);
        Sha256::digest(canonical.to_bytes()).into()
    }
}

/// Derive the media session key from our identity and the peer's public key.
///
/// Host and client call this with the same [`DerivationInputs`] and their
/// own private key; ECDH makes the outputs identical.
///
/// # Errors
///
/// - [`CryptoError::InvalidPublicKey`] on a malformed peer key
pub fn derive_session_key(
    local: &DeviceIdentity,
    peer_public_sec1: &[u8],
    inputs: &DerivationInputs,
) -> Result<SessionKey> {
    let peer = VerifyingKey::from_sec1_bytes(peer_public_sec1)
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let shared = ecdh::diffie_hellman(
        local.signing_key().as_nonzero_scalar(),
        peer.as_affine(),
    );

    let salt = inputs.salt();
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared.raw_secret_bytes().as_slice());
    let mut key = [0u8; 32];
    let Ok(()) = hkdf.expand(SESSION_INFO, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let session = SessionKey(key);
    key.zeroize();
    Ok(session)
}

/// 32-byte shared secret proving a client's UDP endpoint is authorized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RegistrationToken([u8; 32]);

impl RegistrationToken {
    /// Generate a random token from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Construct from raw bytes (the client receives these in the signed
    /// hello response).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw token bytes for transmission.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time comparison against received bytes.
    ///
    /// Length mismatches return false immediately; length is not secret.
    #[must_use]
    pub fn matches(&self, candidate: &[u8]) -> bool {
        if candidate.len() != self.0.len() {
            return false;
        }
        self.0.ct_eq(candidate).into()
    }
}

impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegistrationToken(..)")
    }
}

/// Hello replay protection: timestamp window plus a nonce cache.
///
/// Nonces are remembered for twice the timestamp window, after which a
/// replayed hello is already rejected by the skew check alone.
#[derive(Debug)]
pub struct ReplayGuard {
    window_ms: u64,
    seen: HashMap<[u8; 16], u64>,
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW_MS)
    }
}

impl ReplayGuard {
    /// Create a guard with the given timestamp acceptance window.
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms, seen: HashMap::new() }
    }

    /// Validate a hello's timestamp and nonce, recording the nonce.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::TimestampSkew`] outside ±window
    /// - [`CryptoError::NonceReplayed`] if the nonce was seen within 2×window
    pub fn check(&mut self, timestamp_ms: u64, nonce: [u8; 16], now_ms: u64) -> Result<()> {
        let skew = now_ms.abs_diff(timestamp_ms);
        if skew > self.window_ms {
            return Err(CryptoError::TimestampSkew { skew_ms: skew, limit_ms: self.window_ms });
        }

        let horizon = self.window_ms.saturating_mul(2);
        self.seen.retain(|_, seen_at| now_ms.saturating_sub(*seen_at) <= horizon);

        if self.seen.contains_key(&nonce) {
            return Err(CryptoError::NonceReplayed);
        }
        self.seen.insert(nonce, now_ms);
        Ok(())
    }

    /// Nonces currently cached (diagnostics).
    #[must_use]
    pub fn cached_nonces(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> DerivationInputs {
        DerivationInputs {
            client_id: "client-device".to_string(),
            client_key_id: "aa".repeat(32),
            client_nonce: "00112233445566778899aabbccddeeff".to_string(),
            host_id: "host-device".to_string(),
            host_key_id: "bb".repeat(32),
            host_nonce: "ffeeddccbbaa99887766554433221100".to_string(),
        }
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let client = DeviceIdentity::generate();
        let host = DeviceIdentity::generate();

        let client_key =
            derive_session_key(&client, &host.public_key_bytes(), &inputs()).unwrap();
        let host_key =
            derive_session_key(&host, &client.public_key_bytes(), &inputs()).unwrap();

        assert_eq!(client_key.as_bytes(), host_key.as_bytes());
    }

    #[test]
    fn derivation_is_deterministic() {
        let client = DeviceIdentity::generate();
        let host = DeviceIdentity::generate();

        let a = derive_session_key(&client, &host.public_key_bytes(), &inputs()).unwrap();
        let b = derive_session_key(&client, &host.public_key_bytes(), &inputs()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_nonces_change_the_key() {
        let client = DeviceIdentity::generate();
        let host = DeviceIdentity::generate();

        let a = derive_session_key(&client, &host.public_key_bytes(), &inputs()).unwrap();
        let mut other = inputs();
        other.client_nonce = "11".repeat(16);
        let b = derive_session_key(&client, &host.public_key_bytes(), &other).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn malformed_peer_key_is_rejected() {
        let client = DeviceIdentity::generate();
        assert_eq!(
            derive_session_key(&client, &[4u8; 65], &inputs()).unwrap_err(),
            CryptoError::InvalidPublicKey
        );
    }

    #[test]
    fn token_matches_itself_constant_time() {
        let token = RegistrationToken::generate();
        assert!(token.matches(token.as_bytes()));

        let mut other = *token.as_bytes();
        other[31] ^= 0x01;
        assert!(!token.matches(&other));
        assert!(!token.matches(&other[..16]));
    }

    #[test]
    fn replay_guard_accepts_fresh_rejects_repeat() {
        let mut guard = ReplayGuard::new(60_000);
        let nonce = [7u8; 16];
        guard.check(1_000_000, nonce, 1_000_500).unwrap();
        assert_eq!(guard.check(1_000_000, nonce, 1_001_000), Err(CryptoError::NonceReplayed));
    }

    #[test]
    fn replay_guard_rejects_skewed_timestamps() {
        let mut guard = ReplayGuard::new(60_000);
        let err = guard.check(1_000_000, [1u8; 16], 1_070_000).unwrap_err();
        assert_eq!(err, CryptoError::TimestampSkew { skew_ms: 70_000, limit_ms: 60_000 });

        // Future-dated hellos are rejected symmetrically.
        assert!(guard.check(1_140_000, [2u8; 16], 1_000_000).is_err());
    }

    #[test]
    fn replay_cache_expires_after_twice_the_window() {
        let mut guard = ReplayGuard::new(1_000);
        let nonce = [9u8; 16];
        guard.check(10_000, nonce, 10_000).unwrap();
        assert_eq!(guard.cached_nonces(), 1);

        // 2×window later the nonce ages out; the timestamp window has long
        // since closed for the original message anyway.
        guard.check(12_500, [8u8; 16], 12_500).unwrap();
        assert_eq!(guard.cached_nonces(), 1);
    }
}
