//! Key material and the cryptographic capabilities used by the tree protocol
//!
//! The tree and protocol code never touch a curve directly. Everything goes
//! through [`CryptoProvider`], which [`DalekProvider`] implements with X25519,
//! HKDF-SHA256 and Ed25519.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{ArtError, ArtResult};

/// Size in bytes of every key, shared secret and stage key in the protocol
pub const KEY_SIZE: usize = 32;

/// X25519 public key of a tree node, a prekey or a setup key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// X25519 private key: a leaf key, a derived node key, a prekey or a setup key
///
/// Zeroized when dropped. Comparison runs in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a new random X25519 private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self(secret.to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn to_static_secret(&self) -> StaticSecret {
        let bytes = Zeroizing::new(self.0);
        StaticSecret::from(*bytes)
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SecretKey {}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Output of a single Diffie-Hellman step
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Ed25519 public identity key of a group member
///
/// Opaque to the tree logic; only the provider interprets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdentityKey([u8; KEY_SIZE]);

impl IdentityKey {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Ed25519 signing seed of a group member, only needed by the initiator
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IdentitySecret([u8; KEY_SIZE]);

impl IdentitySecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a new random Ed25519 signing seed
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self(signing_key.to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentitySecret(..)")
    }
}

/// Cryptographic capabilities the tree protocol is built on
///
/// `diffie_hellman` must be symmetric: `dh(a, pub(b)) == dh(b, pub(a))`.
/// Members on opposite sides of a node rely on it to agree on the node key.
pub trait CryptoProvider {
    /// Diffie-Hellman between a private and a public key.
    ///
    /// Fails with [`ArtError::KeyDerivationFailed`] on a degenerate result.
    fn diffie_hellman(
        &self,
        secret_key: &SecretKey,
        public_key: &PublicKey,
    ) -> ArtResult<SharedSecret>;

    /// Public half of a private key
    fn public_key(&self, secret_key: &SecretKey) -> PublicKey;

    /// Keyed derivation of a 32-byte value, wiped when dropped
    fn kdf(&self, salt: &[u8], ikm: &[u8], info: &[u8]) -> ArtResult<Zeroizing<[u8; KEY_SIZE]>>;

    /// Verify a detached signature over `message`
    fn verify_signature(
        &self,
        identity_key: &IdentityKey,
        message: &[u8],
        signature: &[u8],
    ) -> bool;

    /// Produce a detached signature over `message`
    fn sign(&self, signing_key: &IdentitySecret, message: &[u8]) -> ArtResult<Vec<u8>>;

    /// Public identity key of a signing seed
    fn identity_key(&self, signing_key: &IdentitySecret) -> IdentityKey;
}

/// X25519 + HKDF-SHA256 + Ed25519
#[derive(Clone, Copy, Debug, Default)]
pub struct DalekProvider;

impl CryptoProvider for DalekProvider {
    fn diffie_hellman(
        &self,
        secret_key: &SecretKey,
        public_key: &PublicKey,
    ) -> ArtResult<SharedSecret> {
        let secret = secret_key.to_static_secret();
        let public = x25519_dalek::PublicKey::from(*public_key.as_bytes());
        let shared = secret.diffie_hellman(&public);

        if !shared.was_contributory() {
            return Err(ArtError::KeyDerivationFailed(
                "Diffie-Hellman with a low-order public key".to_string(),
            ));
        }

        Ok(SharedSecret(shared.to_bytes()))
    }

    fn public_key(&self, secret_key: &SecretKey) -> PublicKey {
        let secret = secret_key.to_static_secret();
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    fn kdf(&self, salt: &[u8], ikm: &[u8], info: &[u8]) -> ArtResult<Zeroizing<[u8; KEY_SIZE]>> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(info, okm.as_mut_slice())
            .map_err(|err| ArtError::DerivationFailed(format!("HKDF expand: {err}")))?;
        Ok(okm)
    }

    fn verify_signature(
        &self,
        identity_key: &IdentityKey,
        message: &[u8],
        signature: &[u8],
    ) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(identity_key.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify_strict(message, &signature).is_ok()
    }

    fn sign(&self, signing_key: &IdentitySecret, message: &[u8]) -> ArtResult<Vec<u8>> {
        let signing_key = SigningKey::from_bytes(signing_key.as_bytes());
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn identity_key(&self, signing_key: &IdentitySecret) -> IdentityKey {
        let signing_key = SigningKey::from_bytes(signing_key.as_bytes());
        IdentityKey(signing_key.verifying_key().to_bytes())
    }
}
