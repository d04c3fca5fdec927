//! Error types for the toy-art implementation
//!
//! Every failure in the tree protocol surfaces as an [`ArtError`]. Nothing in
//! the library terminates the process; the binaries decide how to report.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for ART operations
#[derive(Debug, Error)]
pub enum ArtError {
    /// The setup message signature did not verify against the initiator's identity key
    #[error("message signature verification failed")]
    AuthenticationFailed,

    /// The setup message could not be decoded
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The public key tree could not be built from its encoding
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// Member index outside `[1, leaf_count]`
    #[error("member index {index} out of range for a tree with {leaf_count} leaves")]
    IndexOutOfRange { index: i64, leaf_count: usize },

    /// A Diffie-Hellman step produced a degenerate result, or derived keys
    /// disagree with the public tree
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// A fixed-size derivation input was malformed
    #[error("derivation failed: {0}")]
    DerivationFailed(String),

    /// A key file or PEM block could not be decoded
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The initiator was handed an unusable member list
    #[error("invalid group: {0}")]
    InvalidGroup(String),

    /// A persisted state record could not be decoded
    #[error("invalid state: {0}")]
    State(String),

    /// Reading or writing a file failed
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArtError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for ART operations
pub type ArtResult<T> = Result<T, ArtError>;
