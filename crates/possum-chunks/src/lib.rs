//! possum-chunks: fixed-size block splitting and content hashing
//!
//! # Overview
//! - `split`: deterministic fixed-size splitting, in-memory or streaming
//! - `sha256`: plaintext content addresses (the input to tag generation)
//! - `checksum`: BLAKE3 checksums over stored ciphertext

pub mod checksum;
pub mod sha256;
pub mod split;

// Convenience re-exports for the most common operations
pub use checksum::{checksum_bytes, checksum_to_hex, Checksum};
pub use sha256::{hash_bytes, hash_from_hex, hash_to_hex};
pub use split::{block_count, split, BlockReader, Blocks};
