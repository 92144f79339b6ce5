//! BLAKE3 checksums over stored ciphertext
//!
//! These detect transport or at-rest corruption of the encrypted object
//! before decryption is attempted. They carry no proof value: anyone can
//! recompute them.

use anyhow::Result;

pub type Checksum = blake3::Hash;

pub fn checksum_bytes(data: &[u8]) -> Checksum {
    blake3::hash(data)
}

pub fn checksum_to_hex(hash: &Checksum) -> String {
    hash.to_hex().to_string()
}

pub fn checksum_from_hex(hex: &str) -> Result<Checksum> {
    blake3::Hash::from_hex(hex)
        .map_err(|e| anyhow::anyhow!("invalid BLAKE3 hex '{}': {}", hex, e))
}

/// Compare `data` against a recorded hex checksum.
pub fn matches_hex(data: &[u8], expected_hex: &str) -> bool {
    checksum_from_hex(expected_hex)
        .map(|expected| checksum_bytes(data) == expected)
        .unwrap_or(false)
}
