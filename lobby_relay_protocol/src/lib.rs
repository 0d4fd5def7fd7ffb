// lobby_relay_protocol: wire protocol for the lobby relay.
//
// This crate defines the datagram framing, control records, ID types and
// handshake crypto used by the relay (`lobby_relay`) and its clients. It is
// shared by both sides and knows nothing about sessions or sockets.
//
// Module overview:
// - `types.rs`:    ID types (`UserId`, `LobbyId`) and the `Role` enum.
// - `message.rs`:  JSON control records `AuthPayload` and `AuthAck`.
// - `framing.rs`:  Control/data classification, the handshake frame codec,
//                  and the acknowledgement codec.
// - `crypto.rs`:   AES-256-GCM seal/open for the handshake body and base64
//                  key decoding.
//
// Design decisions:
// - **JSON control records.** Handshakes are rare and small; JSON keeps them
//   debuggable and matches the account service that issues tokens.
// - **Data payloads are opaque.** A data datagram is any datagram that does
//   not start with `CONTROL_MARKER`; nothing else about it is specified.
// - **No I/O.** Everything here works on byte slices, so the relay's
//   transport loop and the client library share one codec.

pub mod crypto;
pub mod framing;
pub mod message;
pub mod types;

pub use crypto::{CryptoError, KEY_SIZE, decode_key, encode_key, open, seal};
pub use framing::{
    CONTROL_MARKER, Datagram, FrameError, HandshakeFrame, MAX_DATAGRAM_SIZE, MIN_HANDSHAKE_LEN,
    NONCE_SIZE, classify, decode_ack, encode_ack,
};
pub use message::{AuthAck, AuthPayload};
pub use types::{LobbyId, Role, UserId};

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a handshake the way a client does, then take it apart the way
    /// the relay does.
    #[test]
    fn client_handshake_is_readable_by_relay() {
        let key = [9u8; KEY_SIZE];
        let nonce = [3u8; NONCE_SIZE];
        let user = UserId::random();
        let body = serde_json::to_vec(&AuthPayload {
            token: "header.claims.sig".into(),
        })
        .unwrap();
        let sealed = seal(&key, &nonce, &body).unwrap();
        let wire = HandshakeFrame {
            user_id: user,
            nonce,
            ciphertext: &sealed,
        }
        .encode();

        let Some(Datagram::Control(control)) = classify(&wire) else {
            panic!("handshake should classify as control");
        };
        let frame = HandshakeFrame::parse(control).unwrap();
        assert_eq!(frame.user_id, user);
        let plain = open(&key, &frame.nonce, frame.ciphertext).unwrap();
        let payload: AuthPayload = serde_json::from_slice(&plain).unwrap();
        assert_eq!(payload.token, "header.claims.sig");
    }
}
