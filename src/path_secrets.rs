//! Private key derivation along the tree (ART path secrets)
//!
//! A node's private key is `KDF(DH(left, right))` of its children. A member
//! that knows its leaf key and the public keys on its co-path can therefore
//! walk up to the root, one Diffie-Hellman step per level. The initiator, who
//! knows every leaf key, builds the whole tree the same way bottom-up.

use crate::crypto::{CryptoProvider, PublicKey, SecretKey, SharedSecret};
use crate::error::{ArtError, ArtResult};
use crate::tree::PublicTree;
use crate::treemath;

/// KDF label for turning a Diffie-Hellman output into a node private key
pub const NODE_KEY_LABEL: &[u8] = b"art node key";

/// Private keys on a member's direct path, leaf first and root last
pub struct PathKeys {
    keys: Vec<SecretKey>,
}

impl PathKeys {
    /// The tree root secret
    pub fn root(&self) -> &SecretKey {
        // derive_path_keys always starts from the leaf key
        &self.keys[self.keys.len() - 1]
    }

    pub fn leaf(&self) -> &SecretKey {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[SecretKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Turn a shared secret into a node private key
pub fn node_key_from_shared<P: CryptoProvider>(
    provider: &P,
    shared: &SharedSecret,
) -> ArtResult<SecretKey> {
    let bytes = provider.kdf(&[], shared.as_bytes(), NODE_KEY_LABEL)?;
    Ok(SecretKey::from_bytes(*bytes))
}

/// One step up the tree: `KDF(DH(secret, public))`
pub fn derive_node_key<P: CryptoProvider>(
    provider: &P,
    secret: &SecretKey,
    public: &PublicKey,
) -> ArtResult<SecretKey> {
    let shared = provider.diffie_hellman(secret, public)?;
    node_key_from_shared(provider, &shared)
}

/// Leaf key of a member from its prekey and the initiator's setup key.
///
/// The initiator computes the same key as `derive_leaf_key(suk, EK)`.
pub fn derive_leaf_key<P: CryptoProvider>(
    provider: &P,
    prekey: &SecretKey,
    setup_key: &PublicKey,
) -> ArtResult<SecretKey> {
    derive_node_key(provider, prekey, setup_key)
}

/// Derive the private keys from a leaf up to the root.
///
/// `co_path` must be ordered leaf to root, as returned by
/// [`PublicTree::co_path`]. An empty co-path is a one-member tree: the leaf
/// key is returned as the root.
pub fn derive_path_keys<P: CryptoProvider>(
    provider: &P,
    leaf_key: &SecretKey,
    co_path: &[PublicKey],
) -> ArtResult<PathKeys> {
    let mut keys = Vec::with_capacity(co_path.len() + 1);
    keys.push(leaf_key.clone());

    for (level, sibling) in co_path.iter().enumerate() {
        let current = &keys[keys.len() - 1];
        let parent = derive_node_key(provider, current, sibling).map_err(|err| match err {
            ArtError::KeyDerivationFailed(msg) => {
                ArtError::KeyDerivationFailed(format!("level {}: {msg}", level + 1))
            }
            other => other,
        })?;
        keys.push(parent);
    }

    Ok(PathKeys { keys })
}

/// Full private tree, held only by the initiator during setup
pub struct PrivateTree {
    secrets: Vec<SecretKey>,
    public: PublicTree,
}

impl PrivateTree {
    /// Derive every internal node from the leaf keys, children before parents
    pub fn from_leaf_keys<P: CryptoProvider>(
        provider: &P,
        leaf_keys: Vec<SecretKey>,
    ) -> ArtResult<Self> {
        let leaf_count = leaf_keys.len();
        if leaf_count == 0 {
            return Err(ArtError::InvalidGroup("a tree needs at least one leaf".to_string()));
        }

        let width = treemath::node_width(leaf_count);
        let mut slots: Vec<Option<SecretKey>> = vec![None; width];
        for (leaf, key) in leaf_keys.into_iter().enumerate() {
            slots[treemath::leaf_to_node(leaf)] = Some(key);
        }

        for node in treemath::internal_nodes_bottom_up(leaf_count) {
            let (Some(left), Some(right)) =
                (treemath::left(node), treemath::right(node, leaf_count))
            else {
                return Err(ArtError::MalformedTree(format!("node {node} has no children")));
            };
            let (Some(left_key), Some(right_key)) = (&slots[left], &slots[right]) else {
                return Err(ArtError::MalformedTree(format!(
                    "children of node {node} are not derived yet"
                )));
            };

            let right_public = provider.public_key(right_key);
            let key = derive_node_key(provider, left_key, &right_public)?;
            slots[node] = Some(key);
        }

        let secrets = slots
            .into_iter()
            .enumerate()
            .map(|(node, slot)| {
                slot.ok_or_else(|| ArtError::MalformedTree(format!("node {node} was not derived")))
            })
            .collect::<ArtResult<Vec<_>>>()?;
        let public =
            PublicTree::from_nodes(secrets.iter().map(|sk| provider.public_key(sk)).collect())?;

        Ok(Self { secrets, public })
    }

    pub fn public_tree(&self) -> &PublicTree {
        &self.public
    }

    pub fn into_public_tree(self) -> PublicTree {
        self.public
    }

    pub fn root_secret(&self) -> &SecretKey {
        &self.secrets[treemath::root(self.public.leaf_count())]
    }

    /// Leaf key of a member (1-based index)
    pub fn leaf_secret(&self, member_index: i64) -> ArtResult<&SecretKey> {
        let leaf = self.public.leaf_position(member_index)?;
        Ok(&self.secrets[treemath::leaf_to_node(leaf)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DalekProvider;
    use crate::crypto::fake::{FakeProvider, secret};

    fn leaf_keys(count: usize) -> Vec<SecretKey> {
        (0..count).map(|i| secret(i as u8 + 1)).collect()
    }

    #[test]
    fn test_derive_path_keys_single_step() {
        let provider = FakeProvider;
        let leaf = secret(0x01);
        let sibling = PublicKey::from_bytes([0x02; 32]);

        let path = derive_path_keys(&provider, &leaf, &[sibling]).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.leaf(), &leaf);

        // dh = 0x01 ^ 0x02 = 0x03 in every byte
        let expected = provider.kdf(&[], &[0x03; 32], NODE_KEY_LABEL).unwrap();
        assert_eq!(path.root().as_bytes(), &*expected);
    }

    #[test]
    fn test_empty_co_path_returns_leaf_as_root() {
        let provider = FakeProvider;
        let leaf = secret(0x42);
        let path = derive_path_keys(&provider, &leaf, &[]).unwrap();

        assert_eq!(path.len(), 1);
        assert_eq!(path.root(), &leaf);
    }

    #[test]
    fn test_path_keys_chain_in_co_path_order() {
        let provider = FakeProvider;
        let leaf = secret(0x01);
        let a = PublicKey::from_bytes([0x10; 32]);
        let b = PublicKey::from_bytes([0x20; 32]);

        let forward = derive_path_keys(&provider, &leaf, &[a, b]).unwrap();
        let reversed = derive_path_keys(&provider, &leaf, &[b, a]).unwrap();
        assert_ne!(forward.root(), reversed.root());

        let step1 = derive_node_key(&provider, &leaf, &a).unwrap();
        let step2 = derive_node_key(&provider, &step1, &b).unwrap();
        assert_eq!(forward.keys()[1], step1);
        assert_eq!(forward.root(), &step2);
    }

    #[test]
    fn test_degenerate_step_fails() {
        let provider = FakeProvider;
        let leaf = secret(0x05);
        // fake dh of equal bytes is zero
        let result = derive_path_keys(&provider, &leaf, &[PublicKey::from_bytes([0x05; 32])]);
        assert!(matches!(
            result,
            Err(ArtError::KeyDerivationFailed(msg)) if msg.starts_with("level 1")
        ));
    }

    #[test]
    fn test_every_member_reaches_the_root_fake() {
        let provider = FakeProvider;
        for leaf_count in 1..=9 {
            let tree = PrivateTree::from_leaf_keys(&provider, leaf_keys(leaf_count)).unwrap();
            let public = tree.public_tree();

            for index in 1..=leaf_count as i64 {
                let co_path = public.co_path(index).unwrap();
                let leaf = tree.leaf_secret(index).unwrap();
                let path = derive_path_keys(&provider, leaf, &co_path).unwrap();
                assert_eq!(
                    path.root(),
                    tree.root_secret(),
                    "member {index} of {leaf_count}"
                );
            }
        }
    }

    #[test]
    fn test_every_member_reaches_the_root_x25519() {
        let provider = DalekProvider;
        let leaf_count = 6;
        let keys: Vec<SecretKey> = (0..leaf_count).map(|_| SecretKey::generate()).collect();
        let tree = PrivateTree::from_leaf_keys(&provider, keys).unwrap();
        let public = tree.public_tree();

        assert_eq!(&provider.public_key(tree.root_secret()), public.root());
        for index in 1..=leaf_count as i64 {
            let co_path = public.co_path(index).unwrap();
            let path = derive_path_keys(&provider, tree.leaf_secret(index).unwrap(), &co_path)
                .unwrap();
            assert_eq!(path.root(), tree.root_secret());
        }
    }

    #[test]
    fn test_leaf_key_is_symmetric() {
        let provider = DalekProvider;
        let prekey = SecretKey::generate();
        let setup_key = SecretKey::generate();

        let member_side =
            derive_leaf_key(&provider, &prekey, &provider.public_key(&setup_key)).unwrap();
        let initiator_side =
            derive_leaf_key(&provider, &setup_key, &provider.public_key(&prekey)).unwrap();
        assert_eq!(member_side, initiator_side);
    }

    #[test]
    fn test_private_tree_needs_leaves() {
        let result = PrivateTree::from_leaf_keys(&FakeProvider, vec![]);
        assert!(matches!(result, Err(ArtError::InvalidGroup(_))));
    }
}
