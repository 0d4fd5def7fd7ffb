// Core ID types for the relay protocol.
//
// These are lightweight newtypes used by both `framing.rs` (the handshake
// frame carries a `UserId` in its canonical text form) and the relay's
// session directory (`lobby_relay::directory`). Unlike the compact integer
// IDs of a turn relay, identities here are durable UUIDs issued by the
// account system; the relay never mints them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable user identity, supplied by the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Fresh random identity. Used by tooling and tests; the relay itself
    /// only ever parses identities.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase hyphenated, always 36 characters.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lobby (group) identity, resolved through the membership store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub Uuid);

impl LobbyId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for LobbyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A member's position in its lobby's star topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Hub of the star; adjacent to every peer.
    Owner,
    /// Leaf of the star; adjacent only to the owner.
    Peer,
}

impl Role {
    pub fn from_is_owner(is_owner: bool) -> Self {
        if is_owner { Role::Owner } else { Role::Peer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display_is_canonical_36_chars() {
        let id: UserId = "9F1C2A3B-4D5E-4F60-8172-93A4B5C6D7E8".parse().unwrap();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text, "9f1c2a3b-4d5e-4f60-8172-93a4b5c6d7e8");
    }

    #[test]
    fn user_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn role_from_owner_flag() {
        assert_eq!(Role::from_is_owner(true), Role::Owner);
        assert_eq!(Role::from_is_owner(false), Role::Peer);
    }
}
