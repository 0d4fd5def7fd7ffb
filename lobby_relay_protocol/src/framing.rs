// Datagram framing for the relay protocol.
//
// Every datagram is either *control* (first byte is `CONTROL_MARKER`) or
// *data* (anything else). Control datagrams from clients are handshakes:
//
//   byte[0]       = 0xAE
//   byte[1..37)   = UserId, canonical 36-character text form
//   byte[37..49)  = 12-byte AES-GCM nonce
//   byte[49..)    = AES-GCM ciphertext + 16-byte tag
//
// Control datagrams from the relay are acknowledgements: the marker followed
// by a JSON `AuthAck`. Data datagrams are opaque and forwarded unmodified.
//
// Parsing here covers only framing: the length check and the identity parse.
// Decryption lives in `crypto.rs`; everything that needs a collaborator lives
// in the relay crate.

use serde_json::Error as JsonError;
use thiserror::Error;

use crate::message::AuthAck;
use crate::types::UserId;

/// First byte of every control datagram.
pub const CONTROL_MARKER: u8 = 0xAE;

/// Length of the canonical textual `UserId` field.
pub const USER_ID_LEN: usize = 36;

/// AES-GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Marker + identity + nonce.
pub const HANDSHAKE_HEADER_LEN: usize = 1 + USER_ID_LEN + NONCE_SIZE;

/// Smallest datagram that can hold a handshake (an empty plaintext still
/// carries a tag).
pub const MIN_HANDSHAKE_LEN: usize = HANDSHAKE_HEADER_LEN + TAG_SIZE;

/// Largest datagram the relay accepts. Anything longer is dropped.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Framing failures. All of them mean "malformed input": the datagram is
/// dropped without a reply.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("datagram is not a control datagram")]
    NotControl,
    #[error("control datagram too short: {len} bytes (min {MIN_HANDSHAKE_LEN})")]
    TooShort { len: usize },
    #[error("identity field is not a valid UUID")]
    BadIdentity,
    #[error("control body is not valid JSON: {0}")]
    Json(#[from] JsonError),
}

/// A datagram split by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// Starts with `CONTROL_MARKER`; the slice includes the marker.
    Control(&'a [u8]),
    /// Opaque payload.
    Data(&'a [u8]),
}

/// Classify a received datagram. Empty datagrams carry nothing to act on and
/// yield `None`.
pub fn classify(datagram: &[u8]) -> Option<Datagram<'_>> {
    match datagram.first() {
        None => None,
        Some(&CONTROL_MARKER) => Some(Datagram::Control(datagram)),
        Some(_) => Some(Datagram::Data(datagram)),
    }
}

/// A parsed (still encrypted) handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeFrame<'a> {
    pub user_id: UserId,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: &'a [u8],
}

impl<'a> HandshakeFrame<'a> {
    /// Parse a full control datagram, marker included.
    pub fn parse(datagram: &'a [u8]) -> Result<Self, FrameError> {
        if datagram.first() != Some(&CONTROL_MARKER) {
            return Err(FrameError::NotControl);
        }
        if datagram.len() < MIN_HANDSHAKE_LEN {
            return Err(FrameError::TooShort {
                len: datagram.len(),
            });
        }

        let id_field = &datagram[1..1 + USER_ID_LEN];
        let user_id = std::str::from_utf8(id_field)
            .ok()
            .and_then(|s| s.parse::<UserId>().ok())
            .ok_or(FrameError::BadIdentity)?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&datagram[1 + USER_ID_LEN..HANDSHAKE_HEADER_LEN]);

        Ok(Self {
            user_id,
            nonce,
            ciphertext: &datagram[HANDSHAKE_HEADER_LEN..],
        })
    }

    /// Encode into a control datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + self.ciphertext.len());
        out.push(CONTROL_MARKER);
        out.extend_from_slice(self.user_id.to_string().as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(self.ciphertext);
        out
    }
}

/// Encode an acknowledgement: marker, then the JSON record.
pub fn encode_ack(ack: &AuthAck) -> Result<Vec<u8>, FrameError> {
    let mut out = vec![CONTROL_MARKER];
    serde_json::to_writer(&mut out, ack)?;
    Ok(out)
}

/// Decode an acknowledgement datagram.
pub fn decode_ack(datagram: &[u8]) -> Result<AuthAck, FrameError> {
    match datagram.split_first() {
        Some((&CONTROL_MARKER, body)) => Ok(serde_json::from_slice(body)?),
        _ => Err(FrameError::NotControl),
    }
}
