//! Invocation options for the member and initiator tools
//!
//! The binaries parse their arguments with clap and hand these plain structs
//! to the library, which owns the defaults and the path rules.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ArtError, ArtResult};
use crate::group::GroupMember;
use crate::keys::{read_identity_key_file, read_public_key_file};

/// Suffix appended to a message path to find its detached signature
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// Where a member's state is written unless told otherwise
pub const DEFAULT_STATE_FILE: &str = "state.json";

/// Where the initiator writes the setup message unless told otherwise
pub const DEFAULT_MESSAGE_FILE: &str = "setup.msg";

/// `message.json` -> `message.json.sig`
pub fn default_signature_path(message_file: &Path) -> PathBuf {
    let mut path = message_file.as_os_str().to_owned();
    path.push(SIGNATURE_SUFFIX);
    PathBuf::from(path)
}

/// Options for processing a setup message as one member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOptions {
    /// 1-based position of this member in the group config
    pub index: i64,
    /// This member's private prekey (PEM, X25519)
    pub prekey_file: PathBuf,
    /// The initiator's public identity key (PEM, Ed25519)
    pub initiator_identity_file: PathBuf,
    pub message_file: PathBuf,
    /// Detached signature; defaults to the message path plus `.sig`
    pub signature_file: Option<PathBuf>,
    pub state_file: PathBuf,
}

impl ProcessOptions {
    pub fn new(
        index: i64,
        prekey_file: impl Into<PathBuf>,
        initiator_identity_file: impl Into<PathBuf>,
        message_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            prekey_file: prekey_file.into(),
            initiator_identity_file: initiator_identity_file.into(),
            message_file: message_file.into(),
            signature_file: None,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }

    pub fn signature_path(&self) -> PathBuf {
        self.signature_file
            .clone()
            .unwrap_or_else(|| default_signature_path(&self.message_file))
    }
}

/// Options for creating a group as the initiator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupOptions {
    /// The initiator's private identity key (PEM, Ed25519)
    pub initiator_identity_file: PathBuf,
    /// Group config: one `IK_PUB_FILE EK_PUB_FILE` pair per line, initiator first
    pub group_config_file: PathBuf,
    pub message_file: PathBuf,
    pub signature_file: Option<PathBuf>,
    pub state_file: PathBuf,
}

impl SetupOptions {
    pub fn new(
        initiator_identity_file: impl Into<PathBuf>,
        group_config_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            initiator_identity_file: initiator_identity_file.into(),
            group_config_file: group_config_file.into(),
            message_file: PathBuf::from(DEFAULT_MESSAGE_FILE),
            signature_file: None,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }

    pub fn signature_path(&self) -> PathBuf {
        self.signature_file
            .clone()
            .unwrap_or_else(|| default_signature_path(&self.message_file))
    }

    /// Load the members listed in the group config, in order
    pub fn read_members(&self) -> ArtResult<Vec<GroupMember>> {
        let path = &self.group_config_file;
        let text = fs::read_to_string(path).map_err(|err| ArtError::io(path, err))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        parse_group_config(&text)?
            .into_iter()
            .map(|(identity_file, prekey_file)| {
                Ok(GroupMember {
                    identity_key: read_identity_key_file(base.join(identity_file))?,
                    prekey: read_public_key_file(base.join(prekey_file))?,
                })
            })
            .collect()
    }
}

/// Split a group config into `(identity key file, prekey file)` pairs.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_group_config(text: &str) -> ArtResult<Vec<(PathBuf, PathBuf)>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [identity_file, prekey_file] = fields.as_slice() else {
            return Err(ArtError::InvalidGroup(format!(
                "group config line {}: expected IK_PUB_FILE EK_PUB_FILE",
                number + 1
            )));
        };
        entries.push((PathBuf::from(identity_file), PathBuf::from(prekey_file)));
    }

    if entries.is_empty() {
        return Err(ArtError::InvalidGroup("group config lists no members".to_string()));
    }
    Ok(entries)
}
