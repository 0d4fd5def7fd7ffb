// Authentication handshake processing.
//
// A handshake datagram is `[0xAE][36-byte user id][12-byte nonce][ciphertext]`
// where the ciphertext is an AES-256-GCM sealed `AuthPayload` under the
// user's own key. `HandshakeProcessor::process` runs the whole pipeline for
// one datagram:
//
//   1. length check                      (framing)
//   2. identity parse                    (framing)
//   3. key lookup                        (CredentialStore)
//   4. key decode + AEAD open            (crypto)
//   5. payload decode                    (serde_json)
//   6. token verify, subject == identity (TokenVerifier)
//   7. lobby + role lookup               (LobbyMembership)
//   8. directory upsert                  (one critical section)
//   9. acknowledgement                   (best effort)
//
// Any failure before step 8 returns a `HandshakeError` and leaves both the
// directory and the socket untouched. The caller decides how loudly to log
// it; `HandshakeError::kind` groups the variants the way the operator cares
// about them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use lobby_relay_protocol::crypto::{self, CryptoError};
use lobby_relay_protocol::framing::{self, FrameError, HandshakeFrame};
use lobby_relay_protocol::message::{AuthAck, AuthPayload};
use lobby_relay_protocol::types::{LobbyId, Role, UserId};
use thiserror::Error;

use crate::collaborators::{Collaborators, LookupError, TokenError};
use crate::directory::{SessionDirectory, Upsert};
use crate::transport::DatagramSink;

/// Coarse classification of a failed handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Undersized or unparseable input.
    Malformed,
    /// Unknown user, wrong key, or a token that does not verify.
    Authentication,
    /// Valid credentials that do not grant what was asked for.
    Authorization,
    /// A collaborator could not answer, or holds unusable data.
    Unavailable,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Malformed => "malformed",
            FailureKind::Authentication => "authentication",
            FailureKind::Authorization => "authorization",
            FailureKind::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("no usable credentials for {user}: {source}")]
    Credentials { user: UserId, source: LookupError },
    #[error("stored key for {user} is unusable: {source}")]
    KeyEncoding { user: UserId, source: CryptoError },
    #[error("handshake for {user} failed to decrypt")]
    Decrypt { user: UserId },
    #[error("handshake payload for {user} is not valid: {source}")]
    Payload {
        user: UserId,
        source: serde_json::Error,
    },
    #[error("token for {user} rejected: {source}")]
    Token { user: UserId, source: TokenError },
    #[error("token subject {subject:?} does not match frame identity {user}")]
    SubjectMismatch { user: UserId, subject: String },
    #[error("no lobby membership for {user}: {source}")]
    Lobby { user: UserId, source: LookupError },
}

impl HandshakeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HandshakeError::Frame(_) | HandshakeError::Payload { .. } => FailureKind::Malformed,
            HandshakeError::Credentials {
                source: LookupError::NotFound,
                ..
            } => FailureKind::Authentication,
            HandshakeError::Credentials { .. } => FailureKind::Unavailable,
            HandshakeError::KeyEncoding { .. } => FailureKind::Unavailable,
            HandshakeError::Decrypt { .. } | HandshakeError::Token { .. } => {
                FailureKind::Authentication
            }
            HandshakeError::SubjectMismatch { .. } => FailureKind::Authorization,
            HandshakeError::Lobby {
                source: LookupError::NotFound,
                ..
            } => FailureKind::Authorization,
            HandshakeError::Lobby { .. } => FailureKind::Unavailable,
        }
    }

    /// The identity named in the frame, once it has been parsed.
    pub fn user(&self) -> Option<UserId> {
        match self {
            HandshakeError::Frame(_) => None,
            HandshakeError::Credentials { user, .. }
            | HandshakeError::KeyEncoding { user, .. }
            | HandshakeError::Decrypt { user }
            | HandshakeError::Payload { user, .. }
            | HandshakeError::Token { user, .. }
            | HandshakeError::SubjectMismatch { user, .. }
            | HandshakeError::Lobby { user, .. } => Some(*user),
        }
    }
}

/// A session established (or refreshed) by one handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Established {
    pub user: UserId,
    pub lobby: LobbyId,
    pub role: Role,
    pub upsert: Upsert,
    /// Whether the acknowledgement left the socket.
    pub acknowledged: bool,
}

pub struct HandshakeProcessor {
    directory: Arc<SessionDirectory>,
    collaborators: Collaborators,
}

impl HandshakeProcessor {
    pub fn new(directory: Arc<SessionDirectory>, collaborators: Collaborators) -> Self {
        Self {
            directory,
            collaborators,
        }
    }

    /// Authenticate one control datagram from `from` and, on success, bind
    /// the identity to `from` and acknowledge it.
    pub fn process<S: DatagramSink + ?Sized>(
        &self,
        sink: &S,
        from: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Established, HandshakeError> {
        let frame = HandshakeFrame::parse(datagram)?;
        let user = frame.user_id;

        let encoded_key = self
            .collaborators
            .credentials
            .symmetric_key(user)
            .map_err(|source| HandshakeError::Credentials { user, source })?;
        let key = crypto::decode_key(&encoded_key)
            .map_err(|source| HandshakeError::KeyEncoding { user, source })?;
        let plaintext = crypto::open(&key, &frame.nonce, frame.ciphertext)
            .map_err(|_| HandshakeError::Decrypt { user })?;

        let payload: AuthPayload = serde_json::from_slice(&plaintext)
            .map_err(|source| HandshakeError::Payload { user, source })?;

        let claims = self
            .collaborators
            .tokens
            .verify(&payload.token)
            .map_err(|source| HandshakeError::Token { user, source })?;
        // Identities compare as UUIDs, so letter case in either text form
        // does not matter. A subject that is not a UUID never matches.
        if claims.subject.parse::<UserId>().ok() != Some(user) {
            return Err(HandshakeError::SubjectMismatch {
                user,
                subject: claims.subject,
            });
        }

        let membership = self
            .collaborators
            .lobbies
            .lobby_role(user)
            .map_err(|source| HandshakeError::Lobby { user, source })?;

        let upsert = self
            .directory
            .upsert_session(user, from, membership.lobby, membership.role, now);

        let acknowledged = match framing::encode_ack(&AuthAck::ACCEPTED) {
            Ok(ack) => match sink.send_datagram(&ack, from) {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(%user, %from, %error, "handshake ack not sent");
                    false
                }
            },
            Err(error) => {
                tracing::warn!(%user, %error, "handshake ack not encoded");
                false
            }
        };

        Ok(Established {
            user,
            lobby: membership.lobby,
            role: membership.role,
            upsert,
            acknowledged,
        })
    }
}
