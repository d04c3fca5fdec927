//! Setup message wire format
//!
//! A setup message is a JSON object whose keys are PEM strings:
//!
//! ```text
//! { "suk": PEM, "ikeys": [PEM, ...], "tree_keys": [PEM, ...] }
//! ```
//!
//! The signature covers the exact bytes of the encoded message, so decoding
//! only ever happens after verification.

use serde::{Deserialize, Serialize};

use crate::crypto::{IdentityKey, PublicKey};
use crate::error::{ArtError, ArtResult};
use crate::keys::{
    decode_identity_key_pem, decode_public_key_pem, encode_identity_key_pem, encode_public_key_pem,
};
use crate::tree::PublicTree;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupMessage {
    /// Initiator's one-time setup public key
    pub suk: String,
    /// Identity keys of all members, in tree order
    pub ikeys: Vec<String>,
    /// Every node of the public tree, in array order
    pub tree_keys: Vec<String>,
}

impl SetupMessage {
    pub fn new(setup_key: &PublicKey, identity_keys: &[IdentityKey], tree: &PublicTree) -> Self {
        Self {
            suk: encode_public_key_pem(setup_key),
            ikeys: identity_keys.iter().map(encode_identity_key_pem).collect(),
            tree_keys: tree.marshal(),
        }
    }

    pub fn decode(bytes: &[u8]) -> ArtResult<Self> {
        serde_json::from_slice(bytes).map_err(|err| ArtError::MalformedMessage(err.to_string()))
    }

    pub fn encode(&self) -> ArtResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|err| ArtError::MalformedMessage(err.to_string()))
    }

    pub fn setup_key(&self) -> ArtResult<PublicKey> {
        decode_public_key_pem(self.suk.as_bytes())
            .map_err(|err| ArtError::MalformedMessage(format!("setup key: {err}")))
    }

    pub fn identity_keys(&self) -> ArtResult<Vec<IdentityKey>> {
        self.ikeys
            .iter()
            .enumerate()
            .map(|(i, pem)| {
                decode_identity_key_pem(pem.as_bytes()).map_err(|err| {
                    ArtError::MalformedMessage(format!("identity key {}: {err}", i + 1))
                })
            })
            .collect()
    }

    pub fn public_tree(&self) -> ArtResult<PublicTree> {
        PublicTree::unmarshal(&self.tree_keys)
    }
}
