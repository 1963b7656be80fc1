//! Canonical JSON encoding.
//!
//! Handshake signatures are computed over payload bytes, so two encoders that
//! disagree on key order produce unverifiable messages. We canonicalize by
//! routing every value through [`serde_json::Value`], whose object maps are
//! `BTreeMap`-backed: keys come out sorted lexicographically at every nesting
//! level, and the same logical message is byte-identical regardless of struct
//! field declaration order.

use serde::Serialize;

use crate::errors::{ProtocolError, Result};

/// Serialize a value as canonical sorted-key JSON bytes.
///
/// # Errors
///
/// - [`ProtocolError::JsonEncode`] if the value cannot be represented as JSON
///   (e.g. a map with non-string keys)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree =
        serde_json::to_value(value).map_err(|e| ProtocolError::JsonEncode(e.to_string()))?;
    serde_json::to_vec(&tree).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
}

/// Deserialize a value from JSON bytes.
///
/// Decoding is order-insensitive; canonical form is only required on the
/// encode side.
///
/// # Errors
///
/// - [`ProtocolError::JsonDecode`] on malformed JSON or schema mismatch
pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::JsonDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize)]
    struct Unsorted {
        zebra: u32,
        alpha: u32,
        mango: &'static str,
    }

    #[derive(Serialize)]
    struct Sorted {
        alpha: u32,
        mango: &'static str,
        zebra: u32,
    }

    #[test]
    fn field_order_does_not_affect_output() {
        let a = canonical_json(&Unsorted { zebra: 1, alpha: 2, mango: "m" }).unwrap();
        let b = canonical_json(&Sorted { alpha: 2, mango: "m", zebra: 1 }).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn keys_are_sorted_at_every_level() {
        #[derive(Serialize)]
        struct Outer {
            z_inner: Unsorted,
            a_flag: bool,
        }

        let bytes = canonical_json(&Outer {
            z_inner: Unsorted { zebra: 0, alpha: 0, mango: "" },
            a_flag: true,
        })
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            r#"{"a_flag":true,"z_inner":{"alpha":0,"mango":"","zebra":0}}"#
        );
    }

    #[test]
    fn round_trip_preserves_value() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Payload {
            name: String,
            count: u64,
        }

        let original = Payload { name: "display".to_string(), count: 3 };
        let bytes = canonical_json(&original).unwrap();
        let back: Payload = from_json(&bytes).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let result: Result<u32> = from_json(b"{not json");
        assert!(matches!(result, Err(ProtocolError::JsonDecode(_))));
    }
}
