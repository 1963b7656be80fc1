//! Fragment payload checksums.
//!
//! CRC32 with the reflected Ethernet polynomial (0xEDB88320), initial value
//! 0xFFFFFFFF and final XOR 0xFFFFFFFF: the classic IEEE CRC32 that
//! `crc32fast` implements. Computed over the *fragment* plaintext only, never
//! the whole frame, so each datagram is independently checkable before
//! reassembly.

/// CRC32 of a fragment's plaintext payload.
#[must_use]
pub fn fragment_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_check_value() {
        // Standard CRC32/IEEE check vector.
        assert_eq!(fragment_checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn checksum_is_deterministic_and_discriminating() {
        let a = fragment_checksum(b"Hello, World!");
        let b = fragment_checksum(b"Hello, World!");
        let c = fragment_checksum(b"Hello, MirageKit!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, 0);
        assert_ne!(c, 0);
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let mut payload = vec![0xA5u8; 1200];
        let clean = fragment_checksum(&payload);
        payload[617] ^= 0x01;
        assert_ne!(fragment_checksum(&payload), clean);
    }
}
