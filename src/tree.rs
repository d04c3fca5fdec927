//! Public key tree for ART
//!
//! Every node of the tree carries an X25519 public key. Nodes live in a flat
//! array laid out as described in [`crate::treemath`]; serialization keeps that
//! array order, so two members agree on positions without any extra metadata.

use sha2::{Digest, Sha256};

use crate::crypto::PublicKey;
use crate::error::{ArtError, ArtResult};
use crate::keys::{decode_public_key_pem, encode_public_key_pem};
use crate::treemath::{self, LeafIndex, NodeIndex};

/// Left-balanced binary tree of public keys over the group's members
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicTree {
    nodes: Vec<PublicKey>,
    leaf_count: usize,
}

impl PublicTree {
    /// Build a tree from its nodes in array order
    pub fn from_nodes(nodes: Vec<PublicKey>) -> ArtResult<Self> {
        if nodes.is_empty() {
            return Err(ArtError::MalformedTree("tree has no nodes".to_string()));
        }
        let leaf_count = treemath::leaf_width(nodes.len()).ok_or_else(|| {
            ArtError::MalformedTree(format!(
                "{} nodes do not form a tree of 2n - 1 nodes",
                nodes.len()
            ))
        })?;

        Ok(Self { nodes, leaf_count })
    }

    /// Decode a tree from PEM-encoded public keys in array order.
    ///
    /// Fails with [`ArtError::MalformedTree`] on a bad node count or on any
    /// key that is not a valid X25519 point.
    pub fn unmarshal<T: AsRef<[u8]>>(encoded_keys: &[T]) -> ArtResult<Self> {
        let nodes = encoded_keys
            .iter()
            .enumerate()
            .map(|(position, pem)| {
                decode_public_key_pem(pem.as_ref()).map_err(|err| {
                    ArtError::MalformedTree(format!("node {position}: {err}"))
                })
            })
            .collect::<ArtResult<Vec<_>>>()?;

        Self::from_nodes(nodes)
    }

    /// Encode every node as PEM, in array order
    pub fn marshal(&self) -> Vec<String> {
        self.nodes.iter().map(encode_public_key_pem).collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All node keys in array order
    pub fn nodes(&self) -> &[PublicKey] {
        &self.nodes
    }

    pub fn node(&self, node: NodeIndex) -> Option<&PublicKey> {
        self.nodes.get(node)
    }

    pub fn root(&self) -> &PublicKey {
        // from_nodes guarantees at least one node and root < node count
        &self.nodes[treemath::root(self.leaf_count)]
    }

    /// Public key at a member's leaf (1-based member index)
    pub fn leaf(&self, member_index: i64) -> ArtResult<&PublicKey> {
        let leaf = self.leaf_position(member_index)?;
        Ok(&self.nodes[treemath::leaf_to_node(leaf)])
    }

    /// Maximum co-path length in this tree
    pub fn depth(&self) -> usize {
        treemath::depth(self.leaf_count)
    }

    /// Map a 1-based member index to a 0-based leaf position
    pub fn leaf_position(&self, member_index: i64) -> ArtResult<LeafIndex> {
        let out_of_range = || ArtError::IndexOutOfRange {
            index: member_index,
            leaf_count: self.leaf_count,
        };

        let index = usize::try_from(member_index).map_err(|_| out_of_range())?;
        if index == 0 || index > self.leaf_count {
            return Err(out_of_range());
        }
        Ok(index - 1)
    }

    /// Positions of the co-path nodes of a member, leaf to root
    pub fn co_path_nodes(&self, member_index: i64) -> ArtResult<Vec<NodeIndex>> {
        let leaf = self.leaf_position(member_index)?;
        Ok(treemath::copath(leaf, self.leaf_count))
    }

    /// Co-path public keys of a member (1-based index), ordered leaf to root.
    ///
    /// Path key derivation consumes the keys in exactly this order.
    pub fn co_path(&self, member_index: i64) -> ArtResult<Vec<PublicKey>> {
        Ok(self
            .co_path_nodes(member_index)?
            .into_iter()
            .map(|node| self.nodes[node])
            .collect())
    }

    /// SHA-256 over all node keys in array order
    pub fn tree_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for key in &self.nodes {
            hasher.update(key.as_bytes());
        }
        hasher.finalize().into()
    }
}
