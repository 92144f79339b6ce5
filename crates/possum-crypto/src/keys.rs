//! Key material: the symmetric block key, the tag keypair, and the on-disk key file

use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use possum_core::{CryptoError, PossumError, PossumResult};

use crate::tag::{PublicKey, TagGenerator, TagSecret};
use crate::KEY_SIZE;

/// The AES-256 block encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct BlockKey {
    bytes: [u8; KEY_SIZE],
}

impl BlockKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for BlockKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit block encryption key.
pub fn generate_block_key() -> BlockKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    BlockKey::from_bytes(bytes)
}

/// Serialized key file. The public key is stored alongside the secret so it
/// can be exported without touching the secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyFile {
    /// base64
    pub block_key: String,
    /// hex, canonical little-endian scalar
    pub tag_secret: String,
    /// hex, compressed G2
    pub public_key: String,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        self.block_key.zeroize();
        self.tag_secret.zeroize();
    }
}

/// Everything the pipeline needs to encrypt, decrypt, and tag blocks.
#[derive(Debug, Clone)]
pub struct KeyRing {
    block_key: BlockKey,
    tags: TagGenerator,
}

impl KeyRing {
    pub fn new(block_key: BlockKey, tags: TagGenerator) -> Self {
        Self { block_key, tags }
    }

    /// Fresh block key and tag keypair.
    pub fn generate() -> Self {
        Self::new(generate_block_key(), TagGenerator::generate_key())
    }

    pub fn block_key(&self) -> &BlockKey {
        &self.block_key
    }

    pub fn tag_generator(&self) -> &TagGenerator {
        &self.tags
    }

    pub fn public_key(&self) -> &PublicKey {
        self.tags.public_key()
    }

    pub fn to_key_file(&self) -> KeyFile {
        KeyFile {
            block_key: BASE64.encode(self.block_key.as_bytes()),
            tag_secret: self.tags.secret().to_hex(),
            public_key: self.public_key().to_hex(),
        }
    }

    /// Rebuild from a key file, rejecting a stored public key that does not
    /// belong to the stored secret.
    pub fn from_key_file(file: &KeyFile) -> Result<Self, CryptoError> {
        let mut raw = BASE64
            .decode(file.block_key.trim())
            .map_err(|e| CryptoError::Parse(format!("block key base64: {e}")))?;
        if raw.len() != KEY_SIZE {
            let len = raw.len();
            raw.zeroize();
            return Err(CryptoError::Parse(format!(
                "block key must be {KEY_SIZE} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw);
        raw.zeroize();

        let tags = TagGenerator::new(TagSecret::from_hex(&file.tag_secret)?);
        let stored = PublicKey::from_hex(&file.public_key)?;
        if &stored != tags.public_key() {
            return Err(CryptoError::Parse(
                "public key does not match tag secret".into(),
            ));
        }

        Ok(Self::new(BlockKey::from_bytes(bytes), tags))
    }

    /// Load a key file written by [`KeyRing::save`].
    pub fn load(path: &Path) -> PossumResult<Self> {
        if !path.exists() {
            return Err(PossumError::Config(format!(
                "no key file at {} (run `possum keygen`)",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let file: KeyFile = serde_json::from_str(&text)?;
        let ring = Self::from_key_file(&file)?;
        tracing::debug!(path = %path.display(), "loaded key file");
        Ok(ring)
    }

    /// Write the key file, owner-readable only. Refuses to replace an
    /// existing file unless `overwrite` is set.
    pub fn save(&self, path: &Path, overwrite: bool) -> PossumResult<()> {
        if path.exists() && !overwrite {
            return Err(PossumError::Config(format!(
                "key file already exists at {} (use --force to replace it)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.to_key_file())?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            restrict_perms(&file)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), "wrote key file");
        Ok(())
    }
}

/// Load only the public half from a key file or a bare hex string.
pub fn load_public_key(path: &Path) -> PossumResult<PublicKey> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let file: KeyFile = serde_json::from_str(trimmed)?;
        Ok(PublicKey::from_hex(&file.public_key)?)
    } else {
        Ok(PublicKey::from_hex(trimmed)?)
    }
}

#[cfg(unix)]
fn restrict_perms(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(0o600);
    file.set_permissions(perms)
}

#[cfg(not(unix))]
fn restrict_perms(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}
