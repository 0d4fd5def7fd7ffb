// Structured records carried inside control datagrams.
//
// Two records make up the whole control vocabulary:
// - `AuthPayload`: the plaintext of a handshake, sealed with the user's key.
// - `AuthAck`: the relay's answer to a successful handshake.
//
// Both are JSON-encoded (see `framing.rs` for the surrounding bytes). Data
// datagrams have no structure at all; the relay never parses them.

use serde::{Deserialize, Serialize};

/// Decrypted handshake body: the bearer token proving the user's identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// Handshake acknowledgement. The relay only ever sends `ok: true`; a failed
/// handshake gets no reply at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAck {
    pub ok: bool,
}

impl AuthAck {
    pub const ACCEPTED: AuthAck = AuthAck { ok: true };
}
