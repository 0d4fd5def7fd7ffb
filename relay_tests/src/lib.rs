// Test fixture for end-to-end relay tests.
//
// `TestRelayBuilder` declares the users and lobby memberships up front (the
// registry is read-only once the relay starts), then starts a real relay on
// a localhost port. `TestRelay` hands out `TestPeer`s: real `RelayClient`s
// with the matching key, plus blocking helpers that panic with a useful
// message instead of returning errors.
//
// The only test-specific code here is the builder and the polling helpers.
// Handshakes, relaying and expiry all go through the same code paths as
// the `relay` binary.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lobby_relay::directory::SessionDirectory;
use lobby_relay::{
    ClientError, Collaborators, JwtAuthority, RelayClient, RelayConfig, RelayHandle, Registry,
    start_relay,
};
use lobby_relay_protocol::crypto::{KEY_SIZE, encode_key};
use lobby_relay_protocol::framing::CONTROL_MARKER;
use lobby_relay_protocol::types::{LobbyId, UserId};

/// Default timeout for blocking operations.
pub const WAIT: Duration = Duration::from_secs(3);

/// How long to listen before concluding nothing is coming.
pub const QUIET: Duration = Duration::from_millis(250);

const SECRET: &str = "relay-tests-secret";

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Per-user AES key derived from the identity, so tests never mix keys up.
pub fn key_for(user: UserId) -> String {
    let mut key = [0u8; KEY_SIZE];
    key[..16].copy_from_slice(user.0.as_bytes());
    key[16..].copy_from_slice(user.0.as_bytes());
    encode_key(&key)
}

pub struct TestRelayBuilder {
    registry: Registry,
    config: RelayConfig,
}

impl Default for TestRelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRelayBuilder {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            config: RelayConfig {
                port: 0,
                bind_address: [127, 0, 0, 1].into(),
                jwt_secret: SECRET.into(),
                workers: 2,
                ..RelayConfig::default()
            },
        }
    }

    /// Register a new user as owner or peer of `lobby`.
    pub fn member(&mut self, lobby: LobbyId, is_owner: bool) -> UserId {
        let user = self.user_without_lobby();
        self.registry.insert_member(user, lobby, is_owner);
        user
    }

    /// Register a new user with a key but no lobby.
    pub fn user_without_lobby(&mut self) -> UserId {
        let user = UserId::random();
        self.registry.insert_user(user, key_for(user));
        user
    }

    pub fn idle_timeout(mut self, idle: Duration) -> Self {
        self.config.idle_timeout = idle;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn orphan_grace(mut self, grace: Duration) -> Self {
        self.config.orphan_grace = grace;
        self
    }

    pub fn start(self) -> TestRelay {
        let registry = Arc::new(self.registry);
        let authority = JwtAuthority::new(SECRET).expect("bad secret");
        let (handle, addr) = start_relay(
            self.config,
            Collaborators {
                credentials: registry.clone(),
                tokens: Arc::new(authority.clone()),
                lobbies: registry,
            },
        )
        .expect("start_relay failed");
        TestRelay {
            handle: Some(handle),
            addr,
            authority,
        }
    }
}

/// A running relay. Stopped on drop.
pub struct TestRelay {
    handle: Option<RelayHandle>,
    pub addr: std::net::SocketAddr,
    authority: JwtAuthority,
}

impl TestRelay {
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        self.handle
            .as_ref()
            .expect("relay already stopped")
            .directory()
    }

    /// A valid token for `subject`.
    pub fn token(&self, subject: UserId) -> String {
        self.authority
            .issue(&subject.to_string(), Some(Duration::from_secs(300)))
            .expect("token issue failed")
    }

    /// A fresh client socket for `user` (not yet handshaken).
    pub fn client(&self, user: UserId) -> TestPeer {
        TestPeer {
            client: RelayClient::bind(self.addr, user, &key_for(user)).expect("bind failed"),
            user,
        }
    }

    /// A client for `user` that has completed a valid handshake.
    pub fn join(&self, user: UserId) -> TestPeer {
        let peer = self.client(user);
        peer.handshake(&self.token(user))
            .unwrap_or_else(|e| panic!("handshake for {user} failed: {e}"));
        peer
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

/// One client endpoint.
pub struct TestPeer {
    client: RelayClient,
    pub user: UserId,
}

impl TestPeer {
    pub fn handshake(&self, token: &str) -> Result<(), ClientError> {
        self.client.handshake(token, Duration::from_secs(1), 3)
    }

    /// Handshake that is expected to get no answer.
    pub fn handshake_unanswered(&self, token: &str) -> bool {
        self.client
            .handshake(token, Duration::from_millis(200), 2)
            .is_err()
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.client.local_addr().expect("local_addr failed")
    }

    pub fn send(&self, payload: &[u8]) {
        self.client.send(payload).expect("send failed");
    }

    /// Next relayed payload, skipping late handshake acknowledgements.
    pub fn recv_payload(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.client.recv(remaining).expect("recv failed") {
                Some(bytes) if bytes.first() == Some(&CONTROL_MARKER) => continue,
                other => return other,
            }
        }
    }

    pub fn expect_payload(&self) -> Vec<u8> {
        self.recv_payload(WAIT)
            .unwrap_or_else(|| panic!("{} received nothing", self.user))
    }

    pub fn expect_silence(&self) {
        if let Some(bytes) = self.recv_payload(QUIET) {
            panic!(
                "{} expected silence, got {:?}",
                self.user,
                String::from_utf8_lossy(&bytes)
            );
        }
    }
}
