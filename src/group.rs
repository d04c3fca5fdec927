//! Group state, the stage key schedule and the initiator's side of setup

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tempfile::NamedTempFile;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::SetupOptions;
use crate::crypto::{CryptoProvider, IdentityKey, IdentitySecret, KEY_SIZE, PublicKey, SecretKey};
use crate::error::{ArtError, ArtResult};
use crate::keys::{
    self, decode_identity_key_pem, decode_secret_key_pem, encode_identity_key_pem,
    encode_secret_key_pem,
};
use crate::messages::SetupMessage;
use crate::path_secrets::{PrivateTree, derive_leaf_key};
use crate::tree::PublicTree;

/// KDF label of the stage key schedule
pub const STAGE_KEY_LABEL: &[u8] = b"art stage key";

/// Shared group secret of one stage
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StageKey([u8; KEY_SIZE]);

impl StageKey {
    /// The "previous stage key" of the very first stage
    pub fn zero() -> Self {
        Self([0u8; KEY_SIZE])
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl PartialEq for StageKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for StageKey {}

impl std::fmt::Debug for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StageKey(..)")
    }
}

/// Derive the next stage key.
///
/// HKDF-SHA256 with the previous stage key as salt and the tree root secret
/// as input keying material. The info string binds the group membership and
/// topology:
///
/// ```text
/// "art stage key"
/// || u32be(#identity keys) || (u32be(len) || identity key)*
/// || u32be(#tree keys)     || (u32be(len) || tree key)*
/// ```
///
/// Identity keys are taken in member order, tree keys in array order.
pub fn derive_stage_key<P: CryptoProvider>(
    provider: &P,
    previous_stage_key: &[u8],
    tree_secret: &SecretKey,
    identity_keys: &[IdentityKey],
    tree_public_keys: &[PublicKey],
) -> ArtResult<StageKey> {
    if previous_stage_key.len() != KEY_SIZE {
        return Err(ArtError::DerivationFailed(format!(
            "previous stage key is {} bytes, expected {KEY_SIZE}",
            previous_stage_key.len()
        )));
    }

    let info = stage_key_info(identity_keys, tree_public_keys)?;
    let key = provider.kdf(previous_stage_key, tree_secret.as_bytes(), &info)?;
    Ok(StageKey(*key))
}

fn stage_key_info(
    identity_keys: &[IdentityKey],
    tree_public_keys: &[PublicKey],
) -> ArtResult<Vec<u8>> {
    let mut info = Vec::with_capacity(
        STAGE_KEY_LABEL.len() + 8 + (identity_keys.len() + tree_public_keys.len()) * (4 + KEY_SIZE),
    );
    info.extend_from_slice(STAGE_KEY_LABEL);
    append_keys(&mut info, identity_keys.iter().map(IdentityKey::as_bytes))?;
    append_keys(&mut info, tree_public_keys.iter().map(PublicKey::as_bytes))?;
    Ok(info)
}

fn append_keys<'a>(
    info: &mut Vec<u8>,
    keys: impl ExactSizeIterator<Item = &'a [u8; KEY_SIZE]>,
) -> ArtResult<()> {
    let count = u32::try_from(keys.len())
        .map_err(|_| ArtError::DerivationFailed("too many keys".to_string()))?;
    info.extend_from_slice(&count.to_be_bytes());
    for key in keys {
        info.extend_from_slice(&(KEY_SIZE as u32).to_be_bytes());
        info.extend_from_slice(key);
    }
    Ok(())
}

/// A member's durable view of the group after a setup message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeState {
    pub public_tree: PublicTree,
    pub leaf_key: SecretKey,
    pub identity_keys: Vec<IdentityKey>,
    pub stage_key: StageKey,
}

/// On-disk form of [`TreeState`]
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StateRecord {
    public_tree: Vec<String>,
    leaf_key: String,
    ikeys: Vec<String>,
    stage_key: String,
}

impl TreeState {
    pub fn to_json(&self) -> ArtResult<Vec<u8>> {
        let record = StateRecord {
            public_tree: self.public_tree.marshal(),
            leaf_key: encode_secret_key_pem(&self.leaf_key),
            ikeys: self.identity_keys.iter().map(encode_identity_key_pem).collect(),
            stage_key: self.stage_key.to_base64(),
        };
        serde_json::to_vec_pretty(&record).map_err(|err| ArtError::State(err.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> ArtResult<Self> {
        let record: StateRecord =
            serde_json::from_slice(bytes).map_err(|err| ArtError::State(err.to_string()))?;

        let public_tree = PublicTree::unmarshal(&record.public_tree)?;
        let leaf_key = decode_secret_key_pem(record.leaf_key.as_bytes())?;
        let identity_keys = record
            .ikeys
            .iter()
            .map(|pem| decode_identity_key_pem(pem.as_bytes()))
            .collect::<ArtResult<Vec<_>>>()?;

        let mut raw = STANDARD
            .decode(&record.stage_key)
            .map_err(|err| ArtError::State(format!("stage key: {err}")))?;
        let stage_key = <[u8; KEY_SIZE]>::try_from(raw.as_slice())
            .map(StageKey)
            .map_err(|_| ArtError::State(format!("stage key is {} bytes", raw.len())));
        raw.zeroize();

        Ok(Self {
            public_tree,
            leaf_key,
            identity_keys,
            stage_key: stage_key?,
        })
    }

    /// Write the state as JSON, readable only by the owner on unix.
    ///
    /// The previous file at `path` is replaced in one rename, so a failed
    /// save leaves it untouched.
    pub fn save(&self, path: impl AsRef<Path>) -> ArtResult<()> {
        let path = path.as_ref();
        let staged = self.stage(path)?;
        commit_file(staged, path)
    }

    fn stage(&self, path: &Path) -> ArtResult<NamedTempFile> {
        let mut json = self.to_json()?;
        let staged = stage_file(path, &json);
        json.zeroize();
        staged
    }

    pub fn load(path: impl AsRef<Path>) -> ArtResult<Self> {
        let path = path.as_ref();
        let mut json = fs::read(path).map_err(|err| ArtError::io(path, err))?;
        let state = Self::from_json(&json);
        json.zeroize();
        state
    }
}

/// Write `bytes` to an owner-only temporary file next to `path`
fn stage_file(path: &Path, bytes: &[u8]) -> ArtResult<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(|err| ArtError::io(path, err))?;
    file.write_all(bytes).map_err(|err| ArtError::io(path, err))?;
    file.as_file()
        .sync_all()
        .map_err(|err| ArtError::io(path, err))?;
    Ok(file)
}

/// Move a staged file over `path`
fn commit_file(file: NamedTempFile, path: &Path) -> ArtResult<()> {
    file.persist(path)
        .map(drop)
        .map_err(|err| ArtError::io(path, err.error))
}

/// A member as the initiator sees it before setup
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMember {
    pub identity_key: IdentityKey,
    pub prekey: PublicKey,
}

/// Everything the initiator produces for a new group
pub struct SetupBundle {
    /// Encoded setup message, exactly the bytes that were signed
    pub message_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    /// The initiator's own state as member 1
    pub initiator_state: TreeState,
}

/// Build and sign the setup message for a new group.
///
/// The initiator must be the first member. Each leaf key is
/// `KDF(DH(setup_key, prekey_i))`, which member `i` recomputes from its
/// private prekey and the public setup key.
pub fn create_group<P: CryptoProvider>(
    provider: &P,
    initiator: &IdentitySecret,
    members: &[GroupMember],
    setup_key: &SecretKey,
) -> ArtResult<SetupBundle> {
    let Some(first) = members.first() else {
        return Err(ArtError::InvalidGroup("group has no members".to_string()));
    };
    if first.identity_key != provider.identity_key(initiator) {
        return Err(ArtError::InvalidGroup(
            "the initiator must be the first member".to_string(),
        ));
    }

    let leaf_keys = members
        .iter()
        .map(|member| derive_leaf_key(provider, setup_key, &member.prekey))
        .collect::<ArtResult<Vec<_>>>()?;
    let private_tree = PrivateTree::from_leaf_keys(provider, leaf_keys)?;
    let identity_keys: Vec<IdentityKey> = members.iter().map(|m| m.identity_key).collect();

    let stage_key = derive_stage_key(
        provider,
        StageKey::zero().as_bytes(),
        private_tree.root_secret(),
        &identity_keys,
        private_tree.public_tree().nodes(),
    )?;
    let leaf_key = private_tree.leaf_secret(1)?.clone();

    let message = SetupMessage::new(
        &provider.public_key(setup_key),
        &identity_keys,
        private_tree.public_tree(),
    );
    let message_bytes = message.encode()?;
    let signature = provider.sign(initiator, &message_bytes)?;

    tracing::info!(
        members = members.len(),
        tree_depth = private_tree.public_tree().depth(),
        "created setup message"
    );

    Ok(SetupBundle {
        message_bytes,
        signature,
        initiator_state: TreeState {
            public_tree: private_tree.into_public_tree(),
            leaf_key,
            identity_keys,
            stage_key,
        },
    })
}

/// Run the initiator from files: read the group config and the initiator's
/// signing key, write the message, its signature and the initiator's state.
pub fn setup_group_files<P: CryptoProvider>(
    provider: &P,
    options: &SetupOptions,
) -> ArtResult<TreeState> {
    let members = options.read_members()?;
    let initiator = keys::read_identity_secret_file(&options.initiator_identity_file)?;
    let setup_key = SecretKey::generate();

    let bundle = create_group(provider, &initiator, &members, &setup_key)?;

    // stage every output before any of them becomes visible
    let message_path = &options.message_file;
    let signature_path = options.signature_path();
    let staged_state = bundle.initiator_state.stage(&options.state_file)?;
    let staged_signature = stage_file(&signature_path, &bundle.signature)?;
    let staged_message = stage_file(message_path, &bundle.message_bytes)?;

    commit_file(staged_state, &options.state_file)?;
    commit_file(staged_signature, &signature_path)?;
    commit_file(staged_message, message_path)?;

    tracing::info!(
        message_file = %message_path.display(),
        signature_file = %signature_path.display(),
        state_file = %options.state_file.display(),
        "wrote setup files"
    );
    Ok(bundle.initiator_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DalekProvider;
    use crate::crypto::fake::{FakeProvider, secret};

    fn identity(seed: u8) -> IdentityKey {
        IdentityKey::from_bytes([seed; KEY_SIZE])
    }

    fn tree_keys() -> Vec<PublicKey> {
        (1..=3).map(|i| PublicKey::from_bytes([i; KEY_SIZE])).collect()
    }

    #[test]
    fn test_first_stage_is_deterministic() {
        let provider = FakeProvider;
        let ids = [identity(1), identity(2)];

        let a = derive_stage_key(&provider, &[0u8; 32], &secret(9), &ids, &tree_keys()).unwrap();
        let b = derive_stage_key(&provider, &[0u8; 32], &secret(9), &ids, &tree_keys()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_order_matters() {
        let provider = DalekProvider;
        let forward = [identity(1), identity(2)];
        let reversed = [identity(2), identity(1)];

        let a =
            derive_stage_key(&provider, &[0u8; 32], &secret(9), &forward, &tree_keys()).unwrap();
        let b =
            derive_stage_key(&provider, &[0u8; 32], &secret(9), &reversed, &tree_keys()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_input_changes_the_key() {
        let provider = DalekProvider;
        let ids = [identity(1), identity(2)];
        let base = derive_stage_key(&provider, &[0u8; 32], &secret(9), &ids, &tree_keys()).unwrap();

        let other_prev =
            derive_stage_key(&provider, &[1u8; 32], &secret(9), &ids, &tree_keys()).unwrap();
        let other_secret =
            derive_stage_key(&provider, &[0u8; 32], &secret(8), &ids, &tree_keys()).unwrap();
        let mut other_tree = tree_keys();
        other_tree.reverse();
        let other_topology =
            derive_stage_key(&provider, &[0u8; 32], &secret(9), &ids, &other_tree).unwrap();

        assert_ne!(base, other_prev);
        assert_ne!(base, other_secret);
        assert_ne!(base, other_topology);
    }

    #[test]
    fn test_keys_do_not_shift_between_lists() {
        // moving the boundary between identity keys and tree keys must change the key
        let provider = DalekProvider;
        let a = derive_stage_key(
            &provider,
            &[0u8; 32],
            &secret(9),
            &[identity(1), identity(2)],
            &[PublicKey::from_bytes([3; KEY_SIZE])],
        )
        .unwrap();
        let b = derive_stage_key(
            &provider,
            &[0u8; 32],
            &secret(9),
            &[identity(1)],
            &[
                PublicKey::from_bytes([2; KEY_SIZE]),
                PublicKey::from_bytes([3; KEY_SIZE]),
            ],
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_previous_length_fails() {
        let provider = DalekProvider;
        let result = derive_stage_key(&provider, &[0u8; 16], &secret(9), &[], &tree_keys());
        assert!(matches!(result, Err(ArtError::DerivationFailed(_))));
    }

    #[test]
    fn test_create_group_with_fake_provider() {
        let provider = FakeProvider;
        let initiator = IdentitySecret::from_bytes([0xA1; KEY_SIZE]);
        let members: Vec<GroupMember> = (0..3)
            .map(|i| GroupMember {
                identity_key: if i == 0 {
                    provider.identity_key(&initiator)
                } else {
                    identity(0xA1 + i)
                },
                prekey: PublicKey::from_bytes([0x10 + i; KEY_SIZE]),
            })
            .collect();

        let bundle = create_group(&provider, &initiator, &members, &secret(0x77)).unwrap();
        assert!(provider.verify_signature(
            &members[0].identity_key,
            &bundle.message_bytes,
            &bundle.signature
        ));
        assert_eq!(bundle.initiator_state.public_tree.leaf_count(), 3);
        assert_eq!(bundle.initiator_state.identity_keys.len(), 3);
    }

    #[test]
    fn test_create_group_rejects_bad_member_lists() {
        let provider = FakeProvider;
        let initiator = IdentitySecret::from_bytes([0xA1; KEY_SIZE]);

        let empty = create_group(&provider, &initiator, &[], &secret(0x77));
        assert!(matches!(empty, Err(ArtError::InvalidGroup(_))));

        let stranger = [GroupMember {
            identity_key: identity(0x33),
            prekey: PublicKey::from_bytes([0x10; KEY_SIZE]),
        }];
        let not_first = create_group(&provider, &initiator, &stranger, &secret(0x77));
        assert!(matches!(not_first, Err(ArtError::InvalidGroup(_))));
    }

    #[test]
    fn test_state_json_roundtrip() {
        let provider = DalekProvider;
        let initiator = IdentitySecret::generate();
        let members: Vec<GroupMember> = (0..2)
            .map(|i| GroupMember {
                identity_key: if i == 0 {
                    provider.identity_key(&initiator)
                } else {
                    provider.identity_key(&IdentitySecret::generate())
                },
                prekey: provider.public_key(&SecretKey::generate()),
            })
            .collect();
        let bundle = create_group(&provider, &initiator, &members, &SecretKey::generate()).unwrap();
        let state = bundle.initiator_state;

        let json = state.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        for field in ["public_tree", "leaf_key", "ikeys", "stage_key"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }

        let restored = TreeState::from_json(&json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_corrupt_state_is_rejected() {
        assert!(matches!(
            TreeState::from_json(b"{}"),
            Err(ArtError::State(_))
        ));
    }

    fn sample_state() -> TreeState {
        let provider = DalekProvider;
        let initiator = IdentitySecret::generate();
        let members = [
            GroupMember {
                identity_key: provider.identity_key(&initiator),
                prekey: provider.public_key(&SecretKey::generate()),
            },
            GroupMember {
                identity_key: provider.identity_key(&IdentitySecret::generate()),
                prekey: provider.public_key(&SecretKey::generate()),
            },
        ];
        create_group(&provider, &initiator, &members, &SecretKey::generate())
            .unwrap()
            .initiator_state
    }

    #[cfg(unix)]
    #[test]
    fn test_save_over_world_readable_file_restricts_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"old state").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let state = sample_state();
        state.save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(TreeState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_failed_save_leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let previous = sample_state();
        previous.save(&path).unwrap();

        // a directory in the way of the target makes the final rename fail
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("inner"), b"x").unwrap();
        assert!(matches!(
            sample_state().save(&blocked),
            Err(ArtError::Io { .. })
        ));

        assert_eq!(TreeState::load(&path).unwrap(), previous);
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2, "only the state file and the blocking directory");
    }
}
