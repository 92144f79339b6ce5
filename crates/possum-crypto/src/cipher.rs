//! Per-block AES-256-CBC encryption/decryption
//!
//! Each call draws a fresh random 16-byte IV (the block nonce), so two
//! encryptions of the same plaintext never produce the same ciphertext.
//! Plaintext is PKCS#7 padded; the ciphertext length is always the next
//! multiple of 16 strictly above the plaintext length.
//!
//! CBC carries no authentication. Corruption is caught either by an invalid
//! pad on decryption or, when the pad happens to survive, by re-hashing the
//! plaintext against the recorded content hash.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use possum_core::{BlockNonce, CryptoError};

use crate::keys::BlockKey;
use crate::{AES_BLOCK_SIZE, NONCE_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Ciphertext plus the nonce it was produced under.
#[derive(Debug, Clone)]
pub struct EncryptedBlock {
    pub ciphertext: Vec<u8>,
    pub nonce: BlockNonce,
}

/// Encrypt one block under `key` with a fresh random nonce.
pub fn encrypt_block(key: &BlockKey, plaintext: &[u8]) -> EncryptedBlock {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), (&nonce_bytes).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    EncryptedBlock {
        ciphertext,
        nonce: BlockNonce::from_bytes(nonce_bytes),
    }
}

/// Decrypt one block.
///
/// Fails with `CryptoError::Padding` when the ciphertext is not a whole
/// number of cipher blocks or the recovered padding is invalid, which is
/// what a wrong key, wrong nonce, or corrupted ciphertext usually produces.
pub fn decrypt_block(
    key: &BlockKey,
    ciphertext: &[u8],
    nonce: &BlockNonce,
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::Padding);
    }

    Aes256CbcDec::new(key.as_bytes().into(), nonce.as_bytes().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Padding)
}

/// Ciphertext length for a plaintext of `len` bytes.
pub fn ciphertext_len(len: usize) -> usize {
    (len / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE
}
