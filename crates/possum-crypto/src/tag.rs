//! Pairing-based proof-of-storage tags over BLS12-381
//!
//! Setup: generators `P1 ∈ G1`, `P2 ∈ G2`, secret scalar `x`, public key
//! `Ppub = x·P2`. A block with content hash `H` maps to the scalar
//! `h = int(H) mod r` and is tagged with
//!
//! ```text
//! S = (h + x)^-1 · P1                          ∈ G1
//! ```
//!
//! Anyone holding `Ppub` can check the tag:
//!
//! ```text
//! e(S, h·P2 + Ppub) == e(P1, P2)
//! ```
//!
//! Generation needs the secret; verification needs only public material.
//! `e(P1, P2)` is fixed, so it is computed once per `PublicKey`.
//!
//! Encodings are hex over the compressed point forms: 48 bytes for a tag,
//! 96 bytes for a public key.

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Gt, Scalar};
use rand::RngCore;
use zeroize::Zeroize;

use possum_core::{ContentHash, CryptoError};

/// Compressed G1 point.
pub const TAG_SIZE: usize = 48;

/// Compressed G2 point.
pub const PUBLIC_KEY_SIZE: usize = 96;

/// Reduce a SHA-256 digest, read as a big-endian integer, modulo the group order.
pub fn hash_to_scalar(hash: &ContentHash) -> Scalar {
    let mut wide = [0u8; 64];
    for (dst, src) in wide.iter_mut().zip(hash.as_bytes().iter().rev()) {
        *dst = *src;
    }
    Scalar::from_bytes_wide(&wide)
}

/// The tag secret `x`. Zeroized on drop.
#[derive(Clone)]
pub struct TagSecret {
    bytes: [u8; 32],
}

impl TagSecret {
    /// Draw a uniformly random non-zero scalar.
    pub fn generate() -> Self {
        loop {
            let mut wide = [0u8; 64];
            rand::rngs::OsRng.fill_bytes(&mut wide);
            let scalar = Scalar::from_bytes_wide(&wide);
            wide.zeroize();
            if scalar != Scalar::zero() {
                return Self {
                    bytes: scalar.to_bytes(),
                };
            }
        }
    }

    /// Accepts the canonical little-endian encoding of a non-zero scalar.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let scalar: Option<Scalar> = Scalar::from_bytes(&bytes).into();
        match scalar {
            None => Err(CryptoError::Parse("tag secret is not a canonical scalar".into())),
            Some(s) if s == Scalar::zero() => {
                Err(CryptoError::Parse("tag secret must be non-zero".into()))
            }
            Some(_) => Ok(Self { bytes }),
        }
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut raw = hex::decode(s.trim())
            .map_err(|e| CryptoError::Parse(format!("tag secret hex: {e}")))?;
        let bytes: Result<[u8; 32], CryptoError> = raw.as_slice().try_into().map_err(|_| {
            CryptoError::Parse(format!("tag secret must be 32 bytes, got {}", raw.len()))
        });
        raw.zeroize();
        Self::from_bytes(bytes?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    fn scalar(&self) -> Scalar {
        // `bytes` is only ever set from a validated canonical scalar.
        Scalar::from_bytes(&self.bytes).unwrap_or(Scalar::zero())
    }

    /// `Ppub = x·P2`.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_point(G2Affine::from(G2Projective::generator() * self.scalar()))
    }
}

impl Drop for TagSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for TagSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Public verification key `Ppub`, with `e(P1, P2)` precomputed.
#[derive(Clone)]
pub struct PublicKey {
    point: G2Affine,
    base: Gt,
}

impl PublicKey {
    fn from_point(point: G2Affine) -> Self {
        Self {
            point,
            base: pairing(&G1Affine::generator(), &G2Affine::generator()),
        }
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.point.to_compressed()
    }

    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        let point: Option<G2Affine> = G2Affine::from_compressed(bytes).into();
        let point =
            point.ok_or_else(|| CryptoError::Parse("public key is not a valid G2 point".into()))?;
        if bool::from(point.is_identity()) {
            return Err(CryptoError::Parse("public key is the identity".into()));
        }
        Ok(Self::from_point(point))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(s.trim())
            .map_err(|e| CryptoError::Parse(format!("public key hex: {e}")))?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::Parse(format!(
                "public key must be {PUBLIC_KEY_SIZE} bytes, got {}",
                raw.len()
            ))
        })?;
        Self::from_bytes(&bytes)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.point == other.point
    }
}

impl Eq for PublicKey {}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// A proof-of-storage tag `S ∈ G1`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(G1Affine);

impl Tag {
    pub fn to_bytes(&self) -> [u8; TAG_SIZE] {
        self.0.to_compressed()
    }

    pub fn from_bytes(bytes: &[u8; TAG_SIZE]) -> Result<Self, CryptoError> {
        let point: Option<G1Affine> = G1Affine::from_compressed(bytes).into();
        point
            .map(Tag)
            .ok_or_else(|| CryptoError::Parse("tag is not a valid G1 point".into()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let raw =
            hex::decode(s.trim()).map_err(|e| CryptoError::Parse(format!("tag hex: {e}")))?;
        let bytes: [u8; TAG_SIZE] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::Parse(format!("tag must be {TAG_SIZE} bytes, got {}", raw.len()))
        })?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tag").field(&self.to_hex()).finish()
    }
}

/// Holds the secret and its public key; produces tags.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    secret: TagSecret,
    public: PublicKey,
}

impl TagGenerator {
    pub fn new(secret: TagSecret) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn generate_key() -> Self {
        Self::new(TagSecret::generate())
    }

    pub fn secret(&self) -> &TagSecret {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Tag the block whose plaintext hashes to `hash`.
    ///
    /// Fails with `DegenerateKey` in the negligible case `h + x ≡ 0 (mod r)`.
    pub fn generate(&self, hash: &ContentHash) -> Result<Tag, CryptoError> {
        let denom = hash_to_scalar(hash) + self.secret.scalar();
        let inv: Option<Scalar> = denom.invert().into();
        let inv = inv.ok_or(CryptoError::DegenerateKey)?;
        Ok(Tag(G1Affine::from(G1Projective::generator() * inv)))
    }
}

/// Check `e(S, h·P2 + Ppub) == e(P1, P2)`.
pub fn verify(public: &PublicKey, hash: &ContentHash, tag: &Tag) -> bool {
    let h = hash_to_scalar(hash);
    let q = G2Affine::from(G2Projective::generator() * h + G2Projective::from(public.point));
    pairing(&tag.0, &q) == public.base
}

/// `verify` over the textual encodings. Malformed input is an error, not a
/// failed verification.
pub fn verify_encoded(
    public_hex: &str,
    hash_hex: &str,
    tag_hex: &str,
) -> Result<bool, CryptoError> {
    let public = PublicKey::from_hex(public_hex)?;
    let hash = ContentHash::from_hex(hash_hex)?;
    let tag = Tag::from_hex(tag_hex)?;
    Ok(verify(&public, &hash, &tag))
}
