//! Toy ART - the member side of an Asynchronous Ratcheting Tree
//!
//! Group members who are never online at the same time agree on a shared
//! stage key from a binary tree of X25519 public keys. The initiator sends one
//! signed setup message; every member combines it with its own prekey to walk
//! from its leaf to the root and derive the same stage key.
//!
//! ```text
//! prekey ─┐
//!         ├─ DH + KDF ─> leaf key ─ DH(co-path) + KDF ... ─> root secret
//! SUK ────┘                                                    │
//!                 previous stage key, identity keys, tree ─────┴─> stage key
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod group;
pub mod keys;
pub mod messages;
pub mod path_secrets;
pub mod protocol;
pub mod tree;
pub mod treemath;

// Re-export main types for convenience
pub use config::{ProcessOptions, SetupOptions};
pub use crypto::{
    CryptoProvider, DalekProvider, IdentityKey, IdentitySecret, PublicKey, SecretKey,
};
pub use error::{ArtError, ArtResult};
pub use group::{
    GroupMember, SetupBundle, StageKey, TreeState, create_group, derive_stage_key,
    setup_group_files,
};
pub use messages::SetupMessage;
pub use path_secrets::{PathKeys, PrivateTree, derive_leaf_key, derive_path_keys};
pub use protocol::{process_setup_files, process_setup_message};
pub use tree::PublicTree;
