//! Cryptographic primitives for the Mirage streaming protocol.
//!
//! Three concerns, all pure (random bytes come from the caller or `OsRng`
//! at the construction boundary, never mid-operation):
//!
//! - **Identity & signing** ([`identity`]): a long-lived P-256 keypair per
//!   device, DER ECDSA signatures over canonical `key=value` payloads
//!   ([`canonical`]).
//! - **Session establishment** ([`session`]): ECDH(P-256) + HKDF-SHA256
//!   derivation of the 32-byte media key, replay protection for hellos, and
//!   the UDP registration token with constant-time comparison.
//! - **Media AEAD** ([`media_aead`]): per-packet ChaCha20-Poly1305 with
//!   deterministic nonces built from cleartext header fields.

pub mod canonical;
mod errors;
pub mod identity;
pub mod media_aead;
pub mod session;

pub use canonical::CanonicalPayload;
pub use errors::{CryptoError, Result};
pub use identity::DeviceIdentity;
pub use media_aead::{Direction, MediaCipher, MediaKind};
pub use session::{RegistrationToken, ReplayGuard, SessionKey};
