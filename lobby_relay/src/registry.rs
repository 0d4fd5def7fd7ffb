// File-backed user and lobby-membership registry.
//
// Implements `CredentialStore` and `LobbyMembership` from a JSON document
// with two tables:
//
//   {
//     "users":   [ { "id": "<uuid>", "aes_key": "<base64>" } ],
//     "members": [ { "user_id": "<uuid>", "lobby_id": "<uuid>", "is_owner": true } ]
//   }
//
// The registry is loaded once at startup and is read-only afterwards; the
// account service that issues keys and lobby rows rewrites the file and the
// relay is restarted to pick it up. A user listed in several `members` rows
// resolves to the first one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use lobby_relay_protocol::types::{LobbyId, Role, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::{CredentialStore, LobbyMembership, LookupError, Membership};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read registry {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse registry {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    users: Vec<UserRow>,
    #[serde(default)]
    members: Vec<MemberRow>,
}

#[derive(Serialize, Deserialize)]
struct UserRow {
    id: UserId,
    aes_key: String,
}

#[derive(Serialize, Deserialize)]
struct MemberRow {
    user_id: UserId,
    lobby_id: LobbyId,
    is_owner: bool,
}

/// In-memory view of the registry document.
#[derive(Debug, Default)]
pub struct Registry {
    keys: HashMap<UserId, String>,
    members: HashMap<UserId, Membership>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let file: RegistryFile = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for row in file.users {
            registry.insert_user(row.id, row.aes_key);
        }
        for row in file.members {
            registry.insert_member(row.user_id, row.lobby_id, row.is_owner);
        }
        Ok(registry)
    }

    /// Serialize back into the on-disk document form.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let file = RegistryFile {
            users: self
                .keys
                .iter()
                .map(|(id, key)| UserRow {
                    id: *id,
                    aes_key: key.clone(),
                })
                .collect(),
            members: self
                .members
                .iter()
                .map(|(user, m)| MemberRow {
                    user_id: *user,
                    lobby_id: m.lobby,
                    is_owner: m.role == Role::Owner,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&file)
    }

    /// Add or replace a user's key.
    pub fn insert_user(&mut self, user: UserId, aes_key: impl Into<String>) {
        self.keys.insert(user, aes_key.into());
    }

    /// Add a membership row. Later rows for the same user are ignored.
    pub fn insert_member(&mut self, user: UserId, lobby: LobbyId, is_owner: bool) {
        if let Entry::Vacant(slot) = self.members.entry(user) {
            slot.insert(Membership {
                lobby,
                role: Role::from_is_owner(is_owner),
            });
        }
    }

    pub fn user_count(&self) -> usize {
        self.keys.len()
    }
}

impl CredentialStore for Registry {
    fn symmetric_key(&self, user: UserId) -> Result<String, LookupError> {
        self.keys.get(&user).cloned().ok_or(LookupError::NotFound)
    }
}

impl LobbyMembership for Registry {
    fn lobby_role(&self, user: UserId) -> Result<Membership, LookupError> {
        self.members.get(&user).copied().ok_or(LookupError::NotFound)
    }
}
