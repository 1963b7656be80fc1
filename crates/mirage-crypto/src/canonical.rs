//! Canonical payload construction for signed messages.
//!
//! A signature must be computable from a JSON message whose field order the
//! receiver does not control, so signatures are never taken over raw wire
//! bytes. Instead both sides rebuild a canonical rendering: `(field, value)`
//! pairs sorted by field name, joined as `key=value` lines with `\n`.
//! Embedded structures (capabilities, negotiation) are serialized as
//! sorted-key JSON and Base64-encoded before inclusion, so their rendering
//! is also byte-stable.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;

use crate::errors::{CryptoError, Result};

/// Builder for the canonical byte rendering of a signed message.
#[derive(Debug, Clone, Default)]
pub struct CanonicalPayload {
    fields: Vec<(String, String)>,
}

impl CanonicalPayload {
    /// Start an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string-valued field.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    /// Add an integer-valued field (rendered in decimal).
    #[must_use]
    pub fn field_u64(self, name: &str, value: u64) -> Self {
        self.field(name, value.to_string())
    }

    /// Add a boolean field (rendered as "true"/"false").
    #[must_use]
    pub fn field_bool(self, name: &str, value: bool) -> Self {
        self.field(name, if value { "true" } else { "false" })
    }

    /// Add an embedded structure: sorted-key JSON, then Base64.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::KeyDerivation`] if the structure cannot serialize
    pub fn field_json<T: Serialize>(self, name: &str, value: &T) -> Result<Self> {
        let tree = serde_json::to_value(value)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let json =
            serde_json::to_vec(&tree).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(self.field(name, BASE64.encode(json)))
    }

    /// Render the canonical bytes: fields sorted by name, `key=value` lines
    /// joined with `\n`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sorted: Vec<&(String, String)> = self.fields.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let lines: Vec<String> =
            sorted.iter().map(|(name, value)| format!("{name}={value}")).collect();
        lines.join("\n").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fields_sort_by_name() {
        let payload = CanonicalPayload::new()
            .field("nonce", "aa")
            .field("deviceID", "d-1")
            .field_u64("timestampMs", 5);
        assert_eq!(payload.to_bytes(), b"deviceID=d-1\nnonce=aa\ntimestampMs=5");
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = CanonicalPayload::new().field("b", "2").field("a", "1");
        let b = CanonicalPayload::new().field("a", "1").field("b", "2");
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn embedded_json_is_byte_stable() {
        #[derive(Serialize)]
        struct CapsA {
            hevc: bool,
            #[serde(rename = "maxStreams")]
            max_streams: u32,
        }
        #[derive(Serialize)]
        struct CapsB {
            #[serde(rename = "maxStreams")]
            max_streams: u32,
            hevc: bool,
        }

        let a = CanonicalPayload::new()
            .field_json("capabilities", &CapsA { hevc: true, max_streams: 4 })
            .unwrap();
        let b = CanonicalPayload::new()
            .field_json("capabilities", &CapsB { max_streams: 4, hevc: true })
            .unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    proptest! {
        #[test]
        fn rendering_is_permutation_invariant(
            mut pairs in prop::collection::vec(("[a-z]{1,8}", "[a-zA-Z0-9]{0,12}"), 1..8),
            seed in any::<u64>(),
        ) {
            // Distinct names: duplicate fields have no canonical order.
            pairs.sort();
            pairs.dedup_by(|a, b| a.0 == b.0);

            let mut build = CanonicalPayload::new();
            for (name, value) in &pairs {
                build = build.field(name, value.clone());
            }
            let reference = build.to_bytes();

            // Shuffle deterministically by rotating.
            let rotation = (seed as usize) % pairs.len();
            pairs.rotate_left(rotation);
            let mut build = CanonicalPayload::new();
            for (name, value) in &pairs {
                build = build.field(name, value.clone());
            }
            prop_assert_eq!(build.to_bytes(), reference);
        }
    }
}
