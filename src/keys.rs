//! PEM encoding of prekeys, setup keys and identity keys
//!
//! Private keys are PKCS#8 (`PRIVATE KEY`), public keys are SubjectPublicKeyInfo
//! (`PUBLIC KEY`), matching what `openssl genpkey -algorithm X25519|ED25519`
//! produces. Both algorithms have a fixed DER layout, so decoding checks the
//! exact prefix and takes the trailing 32 key bytes.

use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use curve25519_dalek::montgomery::MontgomeryPoint;
use rustls_pemfile::Item;

use crate::crypto::{IdentityKey, IdentitySecret, KEY_SIZE, PublicKey, SecretKey};
use crate::error::{ArtError, ArtResult};

/// PKCS#8 header of an X25519 private key (OID 1.3.101.110)
const X25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04, 0x20,
];

/// SPKI header of an X25519 public key
const X25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// PKCS#8 header of an Ed25519 private key (OID 1.3.101.112)
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// SPKI header of an Ed25519 public key
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";
const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// Decode an X25519 public key (setup key, prekey or tree node key).
///
/// Rejects points that are not on the curve or have small order.
pub fn decode_public_key_pem(pem: &[u8]) -> ArtResult<PublicKey> {
    let der = read_public_der(pem)?;
    let bytes = strip_prefix(&der, &X25519_SPKI_PREFIX, "X25519 public key")?;
    if !is_valid_point(&bytes) {
        return Err(ArtError::InvalidKey(
            "X25519 public key is not a valid curve point".to_string(),
        ));
    }
    Ok(PublicKey::from_bytes(bytes))
}

/// Decode an X25519 private key (prekey)
pub fn decode_secret_key_pem(pem: &[u8]) -> ArtResult<SecretKey> {
    let der = read_private_der(pem)?;
    let bytes = strip_prefix(&der, &X25519_PKCS8_PREFIX, "X25519 private key")?;
    Ok(SecretKey::from_bytes(bytes))
}

/// Decode an Ed25519 public identity key
pub fn decode_identity_key_pem(pem: &[u8]) -> ArtResult<IdentityKey> {
    let der = read_public_der(pem)?;
    let bytes = strip_prefix(&der, &ED25519_SPKI_PREFIX, "Ed25519 public key")?;
    Ok(IdentityKey::from_bytes(bytes))
}

/// Decode an Ed25519 signing key
pub fn decode_identity_secret_pem(pem: &[u8]) -> ArtResult<IdentitySecret> {
    let der = read_private_der(pem)?;
    let bytes = strip_prefix(&der, &ED25519_PKCS8_PREFIX, "Ed25519 private key")?;
    Ok(IdentitySecret::from_bytes(bytes))
}

pub fn encode_public_key_pem(key: &PublicKey) -> String {
    encode_pem(PUBLIC_KEY_LABEL, &X25519_SPKI_PREFIX, key.as_bytes())
}

pub fn encode_secret_key_pem(key: &SecretKey) -> String {
    encode_pem(PRIVATE_KEY_LABEL, &X25519_PKCS8_PREFIX, key.as_bytes())
}

pub fn encode_identity_key_pem(key: &IdentityKey) -> String {
    encode_pem(PUBLIC_KEY_LABEL, &ED25519_SPKI_PREFIX, key.as_bytes())
}

pub fn encode_identity_secret_pem(key: &IdentitySecret) -> String {
    encode_pem(PRIVATE_KEY_LABEL, &ED25519_PKCS8_PREFIX, key.as_bytes())
}

pub fn read_public_key_file(path: impl AsRef<Path>) -> ArtResult<PublicKey> {
    decode_public_key_pem(&read_file(path.as_ref())?)
}

pub fn read_secret_key_file(path: impl AsRef<Path>) -> ArtResult<SecretKey> {
    decode_secret_key_pem(&read_file(path.as_ref())?)
}

pub fn read_identity_key_file(path: impl AsRef<Path>) -> ArtResult<IdentityKey> {
    decode_identity_key_pem(&read_file(path.as_ref())?)
}

pub fn read_identity_secret_file(path: impl AsRef<Path>) -> ArtResult<IdentitySecret> {
    decode_identity_secret_pem(&read_file(path.as_ref())?)
}

fn read_file(path: &Path) -> ArtResult<Vec<u8>> {
    fs::read(path).map_err(|err| ArtError::io(path, err))
}

fn read_item(pem: &[u8]) -> ArtResult<Item> {
    let mut reader = pem;
    rustls_pemfile::read_one(&mut reader)
        .map_err(|err| ArtError::InvalidKey(format!("unreadable PEM: {err}")))?
        .ok_or_else(|| ArtError::InvalidKey("no PEM block found".to_string()))
}

fn read_public_der(pem: &[u8]) -> ArtResult<Vec<u8>> {
    match read_item(pem)? {
        Item::SubjectPublicKeyInfo(spki) => Ok(spki.as_ref().to_vec()),
        _ => Err(ArtError::InvalidKey(format!(
            "expected a {PUBLIC_KEY_LABEL} block"
        ))),
    }
}

fn read_private_der(pem: &[u8]) -> ArtResult<Vec<u8>> {
    match read_item(pem)? {
        Item::Pkcs8Key(key) => Ok(key.secret_pkcs8_der().to_vec()),
        _ => Err(ArtError::InvalidKey(format!(
            "expected a {PRIVATE_KEY_LABEL} block"
        ))),
    }
}

fn strip_prefix(der: &[u8], prefix: &[u8], what: &str) -> ArtResult<[u8; KEY_SIZE]> {
    der.strip_prefix(prefix)
        .and_then(|rest| <[u8; KEY_SIZE]>::try_from(rest).ok())
        .ok_or_else(|| ArtError::InvalidKey(format!("not an encoded {what}")))
}

fn encode_pem(label: &str, prefix: &[u8], key: &[u8; KEY_SIZE]) -> String {
    let mut der = Vec::with_capacity(prefix.len() + KEY_SIZE);
    der.extend_from_slice(prefix);
    der.extend_from_slice(key);
    let body = STANDARD.encode(&der);

    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// On the curve (not the twist) and not of small order
fn is_valid_point(bytes: &[u8; KEY_SIZE]) -> bool {
    MontgomeryPoint(*bytes)
        .to_edwards(0)
        .is_some_and(|point| !point.is_small_order())
}
