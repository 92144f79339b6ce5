use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;

/// SHA-256 digest of a plaintext block, displayed as 64 hex chars.
///
/// This is both the block's content address and the value the
/// proof-of-storage tag is bound to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::Parse(format!("content hash '{s}': {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::Parse(format!("content hash must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-block CBC initialization vector, stored base64-encoded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockNonce([u8; 16]);

impl BlockNonce {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| CryptoError::Parse(format!("nonce '{s}': {e}")))?;
        let arr: [u8; 16] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::Parse(format!("nonce must be 16 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for BlockNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockNonce({})", self.to_base64())
    }
}

impl Serialize for BlockNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for BlockNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockNonce::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// A stored file. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    pub block_count: u64,
    /// Free-form metadata: assembler-populated keys plus caller-supplied ones
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One encrypted, tagged block of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// `{file_id}_block_{index}`
    pub block_id: String,
    pub file_id: String,
    pub index: u64,
    /// SHA-256 of the plaintext, never of the ciphertext
    pub content_hash: ContentHash,
    /// Blob store key holding the ciphertext
    pub ciphertext_ref: String,
    pub nonce: BlockNonce,
    /// Plaintext size in bytes
    pub size_bytes: u64,
    /// Best-effort decoded plaintext excerpt (empty for binary blocks)
    pub content_preview: String,
    /// Hex-encoded compressed G1 point
    pub tag: String,
    /// BLAKE3 of the stored ciphertext (hex)
    pub ciphertext_checksum: String,
}

impl BlockRecord {
    pub fn make_block_id(file_id: &str, index: u64) -> String {
        format!("{file_id}_block_{index}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Tfidf,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Tfidf => "tfidf",
        }
    }
}

/// A search index entry: one scored term for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub block_id: String,
    pub term: String,
    pub kind: TagKind,
    /// In (0, 1]
    pub relevance_score: f64,
}

/// A block matching a search query, with its matching terms merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub block_id: String,
    pub file_id: String,
    pub original_name: String,
    pub block_index: u64,
    pub content_preview: String,
    pub relevance_score: f64,
    pub tags: Vec<String>,
    /// Object URL of the block, filled in when a blob store is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Location of one block of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub index: u64,
    pub ciphertext_ref: String,
    pub url: String,
}

/// File record plus the ordered locations of its blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file: FileRecord,
    pub blocks: Vec<BlockRef>,
}
