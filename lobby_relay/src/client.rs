// UDP client for talking to the relay.
//
// Wraps one `UdpSocket` bound to an ephemeral local port and `connect`ed to
// the relay, so every datagram it receives is from the relay. Usage:
//
//   1. `RelayClient::bind(relay_addr, user, aes_key_b64)`
//   2. `handshake(token, timeout, attempts)`: seals `{"token": ...}` under the
//      user's key with a fresh random nonce, sends it, and waits for the
//      `{"ok":true}` acknowledgement. UDP may lose either direction, so a
//      timed-out attempt resends the whole handshake (each attempt with a
//      new nonce). A failed handshake gets no reply at all; after the last
//      attempt the caller only learns that nothing came back.
//   3. `send(payload)` / `recv(timeout)` for relayed traffic.
//
// Payloads may not start with the control marker (0xAE): the relay would
// treat them as handshakes.
//
// This module lives in the relay crate because it has no dependencies beyond
// std and the protocol crate; integration tests and tools use it directly.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use lobby_relay_protocol::crypto::{self, CryptoError, KEY_SIZE};
use lobby_relay_protocol::framing::{
    self, CONTROL_MARKER, HandshakeFrame, MAX_DATAGRAM_SIZE, NONCE_SIZE,
};
use lobby_relay_protocol::message::AuthPayload;
use lobby_relay_protocol::types::UserId;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("key error: {0}")]
    Key(#[from] CryptoError),
    #[error("cannot encode handshake payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no acknowledgement after {attempts} handshake attempt(s)")]
    NoAcknowledgement { attempts: u32 },
    #[error("payload starts with the control marker and would be read as a handshake")]
    ReservedPrefix,
    #[error("payload is empty")]
    EmptyPayload,
}

/// A relay client bound to one identity.
pub struct RelayClient {
    socket: UdpSocket,
    user: UserId,
    key: [u8; KEY_SIZE],
}

impl RelayClient {
    /// Bind an ephemeral local socket aimed at `relay`.
    pub fn bind(relay: SocketAddr, user: UserId, aes_key_b64: &str) -> Result<Self, ClientError> {
        let key = crypto::decode_key(aes_key_b64)?;
        let local: SocketAddr = if relay.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(relay)?;
        Ok(Self { socket, user, key })
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// Authenticate with `token`, waiting up to `timeout` per attempt.
    /// Datagrams that arrive while waiting and are not an acknowledgement
    /// are discarded.
    pub fn handshake(
        &self,
        token: &str,
        timeout: Duration,
        attempts: u32,
    ) -> Result<(), ClientError> {
        let plaintext = serde_json::to_vec(&AuthPayload {
            token: token.into(),
        })?;
        for _ in 0..attempts.max(1) {
            let mut nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce);
            let ciphertext = crypto::seal(&self.key, &nonce, &plaintext)?;
            let frame = HandshakeFrame {
                user_id: self.user,
                nonce,
                ciphertext: &ciphertext,
            };
            self.socket.send(&frame.encode())?;

            if self.await_ack(timeout)? {
                return Ok(());
            }
        }
        Err(ClientError::NoAcknowledgement {
            attempts: attempts.max(1),
        })
    }

    fn await_ack(&self, timeout: Duration) -> Result<bool, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match self.recv_into(&mut buf, remaining)? {
                Some(len) => {
                    if framing::decode_ack(&buf[..len]).is_ok_and(|ack| ack.ok) {
                        return Ok(true);
                    }
                }
                None => return Ok(false),
            }
        }
    }

    /// Send an opaque payload for the relay to forward.
    pub fn send(&self, payload: &[u8]) -> Result<(), ClientError> {
        match payload.first() {
            None => Err(ClientError::EmptyPayload),
            Some(&CONTROL_MARKER) => Err(ClientError::ReservedPrefix),
            Some(_) => {
                self.socket.send(payload)?;
                Ok(())
            }
        }
    }

    /// Wait up to `timeout` for one datagram. `None` on timeout.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ClientError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        Ok(self
            .recv_into(&mut buf, timeout)?
            .map(|len| buf[..len].to_vec()))
    }

    fn recv_into(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, ClientError> {
        // A zero read timeout is rejected by the socket API.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv(buf) {
            Ok(len) => Ok(Some(len)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            // A connected UDP socket reports an earlier ICMP "port
            // unreachable" on the next receive; treat it as silence.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_b64() -> String {
        crypto::encode_key(&[0x44; KEY_SIZE])
    }

    #[test]
    fn rejects_control_prefixed_and_empty_payloads() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client =
            RelayClient::bind(sink.local_addr().unwrap(), UserId::random(), &key_b64()).unwrap();

        assert!(matches!(
            client.send(&[CONTROL_MARKER, 1, 2]),
            Err(ClientError::ReservedPrefix)
        ));
        assert!(matches!(client.send(&[]), Err(ClientError::EmptyPayload)));
        client.send(b"ok").unwrap();
    }

    #[test]
    fn bad_key_is_rejected_at_bind() {
        let relay: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(matches!(
            RelayClient::bind(relay, UserId::random(), "c2hvcnQ="),
            Err(ClientError::Key(CryptoError::KeyLength(5)))
        ));
    }

    #[test]
    fn handshake_frame_is_sealed_for_the_user() {
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        relay
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let user = UserId::random();
        let client = RelayClient::bind(relay.local_addr().unwrap(), user, &key_b64()).unwrap();

        // Nobody answers, so the single attempt times out.
        let err = client
            .handshake("tok", Duration::from_millis(50), 1)
            .unwrap_err();
        assert!(matches!(err, ClientError::NoAcknowledgement { attempts: 1 }));

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = relay.recv_from(&mut buf).unwrap();
        assert_eq!(from, client.local_addr().unwrap());
        let frame = HandshakeFrame::parse(&buf[..len]).unwrap();
        assert_eq!(frame.user_id, user);
        let plaintext = crypto::open(&[0x44; KEY_SIZE], &frame.nonce, frame.ciphertext).unwrap();
        let payload: AuthPayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(payload.token, "tok");
    }

    #[test]
    fn handshake_completes_on_ack() {
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client =
            RelayClient::bind(relay.local_addr().unwrap(), UserId::random(), &key_b64()).unwrap();

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            let (_, from) = relay.recv_from(&mut buf).unwrap();
            // Noise first, then the real acknowledgement.
            relay.send_to(b"noise", from).unwrap();
            let ack = framing::encode_ack(&lobby_relay_protocol::message::AuthAck::ACCEPTED).unwrap();
            relay.send_to(&ack, from).unwrap();
        });

        client.handshake("tok", Duration::from_secs(5), 1).unwrap();
        responder.join().unwrap();
    }
}
