// Interfaces to the services the relay depends on but does not own.
//
// - `CredentialStore`: per-user symmetric key, in its base64 transport form.
// - `TokenVerifier`:   bearer-token verification, yielding the subject claim.
// - `LobbyMembership`: which lobby a user belongs to and whether they own it.
//
// All three are synchronous and called from worker threads; a slow
// implementation stalls only the datagram being processed. Concrete
// implementations live in `registry.rs` (credentials + membership) and
// `token.rs` (HS256 JWTs). Tests substitute their own.

use std::sync::Arc;

use lobby_relay_protocol::types::{LobbyId, Role, UserId};
use thiserror::Error;

/// Failure of a keyed lookup.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("not found")]
    NotFound,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Why a bearer token was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a well-formed JWT")]
    Malformed,
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("signature does not verify")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token has no subject claim")]
    MissingSubject,
}

/// Claims the relay needs from a verified token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject: String,
}

/// A user's lobby and their role in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Membership {
    pub lobby: LobbyId,
    pub role: Role,
}

pub trait CredentialStore: Send + Sync {
    /// Base64-encoded AES-256 key for `user`.
    fn symmetric_key(&self, user: UserId) -> Result<String, LookupError>;
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError>;
}

pub trait LobbyMembership: Send + Sync {
    fn lobby_role(&self, user: UserId) -> Result<Membership, LookupError>;
}

/// The three collaborators, as handed to `start_relay`.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<dyn TokenVerifier>,
    pub lobbies: Arc<dyn LobbyMembership>,
}
