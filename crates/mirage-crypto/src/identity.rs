//! Device identity: a long-lived P-256 keypair.
//!
//! The same keypair signs handshake payloads (DER ECDSA) and feeds ECDH for
//! session key derivation. A device's **key ID** is the lowercase hex
//! SHA-256 of its SEC1 uncompressed public key bytes; peers pin key IDs
//! across sessions.

use p256::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::{
    canonical::CanonicalPayload,
    errors::{CryptoError, Result},
};

/// Long-lived signing identity for one device.
#[derive(Clone)]
pub struct DeviceIdentity {
    signing: SigningKey,
}

impl DeviceIdentity {
    /// Generate a fresh identity from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self { signing: SigningKey::random(&mut OsRng) }
    }

    /// Reconstruct an identity from 32 secret scalar bytes.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPublicKey`] if the bytes are not a valid
    ///   nonzero scalar
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let signing =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { signing })
    }

    /// SEC1 uncompressed public key bytes (65 bytes).
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing.verifying_key().to_encoded_point(false).as_bytes().to_vec()
    }

    /// Lowercase hex SHA-256 of the public key bytes.
    #[must_use]
    pub fn key_id(&self) -> String {
        key_id_for(&self.public_key_bytes())
    }

    /// Sign a canonical payload; returns DER-encoded ECDSA bytes.
    #[must_use]
    pub fn sign(&self, payload: &CanonicalPayload) -> Vec<u8> {
        let signature: Signature = self.signing.sign(&payload.to_bytes());
        signature.to_der().as_bytes().to_vec()
    }

    /// Secret scalar bytes, for persistence by the platform keystore layer.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes().into()
    }

    /// Borrow the signing key for ECDH (see [`crate::session`]).
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity").field("key_id", &self.key_id()).finish_non_exhaustive()
    }
}

/// Key ID for raw public key bytes: lowercase hex SHA-256.
#[must_use]
pub fn key_id_for(public_key_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key_bytes))
}

/// Verify a DER ECDSA signature over a canonical payload.
///
/// # Errors
///
/// - [`CryptoError::InvalidPublicKey`] on a malformed SEC1 key
/// - [`CryptoError::InvalidSignature`] on malformed DER
/// - [`CryptoError::SignatureVerification`] if the signature does not verify
pub fn verify_signature(
    public_key_sec1: &[u8],
    payload: &CanonicalPayload,
    signature_der: &[u8],
) -> Result<()> {
    let verifying = VerifyingKey::from_sec1_bytes(public_key_sec1)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::from_der(signature_der).map_err(|_| CryptoError::InvalidSignature)?;
    verifying
        .verify(&payload.to_bytes(), &signature)
        .map_err(|_| CryptoError::SignatureVerification)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> CanonicalPayload {
        CanonicalPayload::new()
            .field("deviceID", "d-1")
            .field("nonce", "00112233445566778899aabbccddeeff")
            .field_u64("timestampMs", 1_722_000_000_000)
    }

    #[test]
    fn sign_verify_round_trip() {
        let identity = DeviceIdentity::generate();
        let payload = sample_payload();
        let signature = identity.sign(&payload);
        verify_signature(&identity.public_key_bytes(), &payload, &signature).unwrap();
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let identity = DeviceIdentity::generate();
        let signature = identity.sign(&sample_payload());
        let tampered = sample_payload().field("extra", "1");
        assert_eq!(
            verify_signature(&identity.public_key_bytes(), &tampered, &signature),
            Err(CryptoError::SignatureVerification)
        );
    }

    #[test]
    fn wrong_key_fails_verification() {
        let identity = DeviceIdentity::generate();
        let other = DeviceIdentity::generate();
        let payload = sample_payload();
        let signature = identity.sign(&payload);
        assert_eq!(
            verify_signature(&other.public_key_bytes(), &payload, &signature),
            Err(CryptoError::SignatureVerification)
        );
    }

    #[test]
    fn malformed_inputs_are_typed_errors() {
        let payload = sample_payload();
        assert_eq!(
            verify_signature(&[0u8; 65], &payload, &[0u8; 70]),
            Err(CryptoError::InvalidPublicKey)
        );

        let identity = DeviceIdentity::generate();
        assert_eq!(
            verify_signature(&identity.public_key_bytes(), &payload, b"not-der"),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn key_id_is_lowercase_hex_of_sha256() {
        let identity = DeviceIdentity::generate();
        let id = identity.key_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id, key_id_for(&identity.public_key_bytes()));
    }

    #[test]
    fn identity_round_trips_through_secret_bytes() {
        let identity = DeviceIdentity::generate();
        let restored = DeviceIdentity::from_secret_bytes(&identity.secret_bytes()).unwrap();
        assert_eq!(restored.key_id(), identity.key_id());
    }
}
