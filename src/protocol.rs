//! Processing a setup message as a group member
//!
//! The driver runs the setup steps strictly in order and returns the new
//! [`TreeState`] only once all of them succeeded:
//!
//! 1. verify the initiator's signature over the raw message bytes
//! 2. decode the setup key, identity keys and public tree
//! 3. derive the leaf key from the member's prekey and the setup key
//! 4. resolve the co-path and derive the path keys up to the root
//! 5. derive the first stage key
//! 6. return the state

use std::fs;

use crate::config::ProcessOptions;
use crate::crypto::{CryptoProvider, IdentityKey, SecretKey};
use crate::error::{ArtError, ArtResult};
use crate::group::{StageKey, TreeState, derive_stage_key};
use crate::keys::{read_identity_key_file, read_secret_key_file};
use crate::messages::SetupMessage;
use crate::path_secrets::{derive_leaf_key, derive_path_keys};

/// Process a setup message for the member at `member_index` (1-based).
///
/// `message_bytes` must be the exact bytes the initiator signed.
pub fn process_setup_message<P: CryptoProvider>(
    provider: &P,
    member_index: i64,
    prekey: &SecretKey,
    initiator_identity: &IdentityKey,
    message_bytes: &[u8],
    signature: &[u8],
) -> ArtResult<TreeState> {
    let _span = tracing::debug_span!("process_setup_message", member_index).entered();

    if !provider.verify_signature(initiator_identity, message_bytes, signature) {
        tracing::warn!("setup message signature rejected");
        return Err(ArtError::AuthenticationFailed);
    }
    tracing::debug!(bytes = message_bytes.len(), "signature verified");

    let message = SetupMessage::decode(message_bytes)?;
    let setup_key = message.setup_key()?;
    let identity_keys = message.identity_keys()?;
    let public_tree = message.public_tree()?;
    if identity_keys.len() != public_tree.leaf_count() {
        return Err(ArtError::MalformedMessage(format!(
            "{} identity keys for a tree with {} leaves",
            identity_keys.len(),
            public_tree.leaf_count()
        )));
    }
    tracing::debug!(leaf_count = public_tree.leaf_count(), "message decoded");

    let co_path = public_tree.co_path(member_index)?;

    let leaf_key = derive_leaf_key(provider, prekey, &setup_key)?;
    if provider.public_key(&leaf_key) != *public_tree.leaf(member_index)? {
        return Err(ArtError::KeyDerivationFailed(format!(
            "leaf key derived from the prekey does not match leaf {member_index} of the tree"
        )));
    }
    tracing::debug!("leaf key derived");

    let path_keys = derive_path_keys(provider, &leaf_key, &co_path)?;
    if provider.public_key(path_keys.root()) != *public_tree.root() {
        return Err(ArtError::KeyDerivationFailed(
            "derived root key does not match the tree root".to_string(),
        ));
    }
    tracing::debug!(co_path_len = co_path.len(), "path keys derived");

    let stage_key = derive_stage_key(
        provider,
        StageKey::zero().as_bytes(),
        path_keys.root(),
        &identity_keys,
        public_tree.nodes(),
    )?;
    drop(path_keys);

    tracing::info!(
        member_index,
        leaf_count = public_tree.leaf_count(),
        "setup message processed"
    );

    Ok(TreeState {
        public_tree,
        leaf_key,
        identity_keys,
        stage_key,
    })
}

/// Run [`process_setup_message`] on the files named in `options` and write
/// the resulting state to `options.state_file`.
pub fn process_setup_files<P: CryptoProvider>(
    provider: &P,
    options: &ProcessOptions,
) -> ArtResult<TreeState> {
    let prekey = read_secret_key_file(&options.prekey_file)?;
    let initiator_identity = read_identity_key_file(&options.initiator_identity_file)?;

    let message_path = &options.message_file;
    let message_bytes = fs::read(message_path).map_err(|err| ArtError::io(message_path, err))?;
    let signature_path = options.signature_path();
    let signature = fs::read(&signature_path).map_err(|err| ArtError::io(&signature_path, err))?;

    let state = process_setup_message(
        provider,
        options.index,
        &prekey,
        &initiator_identity,
        &message_bytes,
        &signature,
    )?;
    state.save(&options.state_file)?;

    tracing::debug!(state_file = %options.state_file.display(), "state written");
    Ok(state)
}
