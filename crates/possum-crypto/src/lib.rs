//! possum-crypto: block encryption and proof-of-storage tags
//!
//! Pipeline per block: plaintext → SHA-256 → tag(hash) and AES-256-CBC(plaintext) → upload
//!
//! Key material:
//! ```text
//! KeyRing
//!   ├── Block Key (256-bit random, AES-256-CBC, fresh 128-bit IV per block)
//!   └── Tag Keypair (BLS12-381)
//!       ├── secret x ∈ Z_r
//!       └── public Ppub = x·P2 (shareable, verification only)
//! ```

pub mod cipher;
pub mod keys;
pub mod tag;

pub use cipher::{ciphertext_len, decrypt_block, encrypt_block, EncryptedBlock};
pub use keys::{generate_block_key, load_public_key, BlockKey, KeyFile, KeyRing};
pub use tag::{
    hash_to_scalar, verify, verify_encoded, PublicKey, Tag, TagGenerator, TagSecret,
    PUBLIC_KEY_SIZE, TAG_SIZE,
};

/// Size of a block key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a CBC initialization vector (128-bit)
pub const NONCE_SIZE: usize = 16;

/// AES block size; ciphertext lengths are multiples of this
pub const AES_BLOCK_SIZE: usize = 16;
