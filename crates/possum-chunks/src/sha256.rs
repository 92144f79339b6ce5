//! SHA-256 content addressing for plaintext blocks
//!
//! The digest identifies a block by content and is the input the
//! proof-of-storage tag binds to, so it is always computed over plaintext.

use possum_core::{ContentHash, CryptoError};
use sha2::{Digest, Sha256};

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_bytes(Sha256::digest(data).into())
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &ContentHash) -> String {
    hash.to_hex()
}

/// Parse a 64-char hex string into a hash
pub fn hash_from_hex(hex: &str) -> Result<ContentHash, CryptoError> {
    ContentHash::from_hex(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_to_hex(&hash_bytes(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(hash_bytes(b"foo"), hash_bytes(b"bar"));
    }

    #[test]
    fn hex_roundtrip() {
        let h = hash_bytes(b"hello possum");
        assert_eq!(hash_from_hex(&hash_to_hex(&h)).unwrap(), h);
    }

    proptest! {
        #[test]
        fn single_bit_flip_changes_digest(
            data in proptest::collection::vec(any::<u8>(), 1..=2048),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut flipped = data.clone();
            let i = pos.index(flipped.len());
            flipped[i] ^= 1 << bit;
            prop_assert_ne!(hash_bytes(&data), hash_bytes(&flipped));
        }
    }
}
