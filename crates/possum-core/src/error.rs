use thiserror::Error;

pub type PossumResult<T> = Result<T, PossumError>;

/// Failures raised by the cryptographic primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Unpadding failed: corrupted ciphertext, wrong nonce, or wrong key.
    #[error("invalid padding: ciphertext corrupted or decrypted with the wrong key/nonce")]
    Padding,

    /// `h + x ≡ 0 (mod r)`: no inverse exists, so no tag can be produced.
    #[error("degenerate key: content hash and secret scalar sum to zero mod r")]
    DegenerateKey,

    /// An encoded scalar, group element, digest, or key could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum PossumError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PossumError {
    /// True when content was corrupted or tampered with, as opposed to being
    /// unreachable.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            PossumError::Integrity(_) | PossumError::Crypto(CryptoError::Padding)
        )
    }

    /// True when the blob store could not be reached or refused the request.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, PossumError::Storage(_))
    }
}
