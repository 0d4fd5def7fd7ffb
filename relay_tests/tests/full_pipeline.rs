// End-to-end tests for the relay over real UDP sockets.
//
// Each test starts a relay with its own registry, joins clients through the
// real handshake, and checks what arrives where: star routing, address
// rebinding, replayed handshakes, expiry, rejected handshakes, late owners,
// and the orphan grace period. Directory state is inspected through the
// relay handle where the wire alone cannot show it.

use std::time::Duration;

use lobby_relay_protocol::types::LobbyId;
use relay_tests::{TestRelayBuilder, WAIT, wait_until};

#[test]
fn star_routing_between_owner_and_peers() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let p1 = builder.member(lobby, false);
    let p2 = builder.member(lobby, false);
    let relay = builder.start();

    let owner = relay.join(owner);
    let p1 = relay.join(p1);
    let p2 = relay.join(p2);

    // Peer -> owner only.
    p1.send(b"from p1");
    assert_eq!(owner.expect_payload(), b"from p1");
    p2.expect_silence();

    // Owner -> every peer.
    owner.send(b"from owner");
    assert_eq!(p1.expect_payload(), b"from owner");
    assert_eq!(p2.expect_payload(), b"from owner");
    owner.expect_silence();
}

#[test]
fn lobbies_are_isolated() {
    let (a, b) = (LobbyId::random(), LobbyId::random());
    let mut builder = TestRelayBuilder::new();
    let owner_a = builder.member(a, true);
    let peer_a = builder.member(a, false);
    let owner_b = builder.member(b, true);
    let peer_b = builder.member(b, false);
    let relay = builder.start();

    let owner_a = relay.join(owner_a);
    let peer_a = relay.join(peer_a);
    let owner_b = relay.join(owner_b);
    let peer_b = relay.join(peer_b);

    owner_a.send(b"lobby a");
    assert_eq!(peer_a.expect_payload(), b"lobby a");
    peer_b.expect_silence();
    owner_b.expect_silence();
}

#[test]
fn rebinding_moves_traffic_to_the_new_address() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder.start();

    let owner_client = relay.join(owner);
    let old = relay.join(peer);
    let old_addr = old.addr();

    // Same identity, new socket (a client restart or a NAT rebinding).
    let new = relay.join(peer);
    let new_addr = new.addr();
    assert_ne!(old_addr, new_addr);

    let dir = relay.directory();
    assert_eq!(dir.resolve_by_address(old_addr), None);
    assert_eq!(dir.resolve_by_address(new_addr), Some(peer));
    assert_eq!(dir.resolve_address(peer), Some(new_addr));

    owner_client.send(b"after move");
    assert_eq!(new.expect_payload(), b"after move");
    old.expect_silence();

    // The superseded endpoint can no longer relay.
    old.send(b"ghost");
    owner_client.expect_silence();
}

#[test]
fn replayed_handshake_keeps_one_edge() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder.start();

    let owner_client = relay.join(owner);
    let peer_client = relay.join(peer);
    let token = relay.token(peer);
    peer_client.handshake(&token).unwrap();
    peer_client.handshake(&token).unwrap();

    let star = relay.directory().lobby(lobby).unwrap();
    assert_eq!(star.owner, Some(owner));
    assert_eq!(star.peers, vec![peer]);

    owner_client.send(b"once");
    assert_eq!(peer_client.expect_payload(), b"once");
    peer_client.expect_silence();
}

#[test]
fn unknown_sender_is_not_relayed() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder.start();

    let owner_client = relay.join(owner);
    // Registered, but never handshakes.
    let silent_peer = relay.client(peer);
    silent_peer.send(b"let me in");
    owner_client.expect_silence();
    assert_eq!(relay.directory().resolve_by_address(silent_peer.addr()), None);
}

#[test]
fn mismatched_token_subject_is_ignored() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder.start();

    // The peer's own key, but the owner's token.
    let impostor = relay.client(peer);
    assert!(impostor.handshake_unanswered(&relay.token(owner)));
    assert!(relay.directory().is_empty());
    assert!(relay.directory().lobby(lobby).is_none());
}

#[test]
fn unregistered_identity_gets_no_reply() {
    let builder = TestRelayBuilder::new();
    let relay = builder.start();

    let stranger = lobby_relay_protocol::types::UserId::random();
    let client = relay.client(stranger);
    assert!(client.handshake_unanswered(&relay.token(stranger)));
    assert!(relay.directory().is_empty());
}

#[test]
fn member_without_lobby_gets_no_reply() {
    let mut builder = TestRelayBuilder::new();
    let loner = builder.user_without_lobby();
    let relay = builder.start();

    let client = relay.client(loner);
    assert!(client.handshake_unanswered(&relay.token(loner)));
    assert!(relay.directory().is_empty());
}

#[test]
fn peer_joining_before_owner_is_linked_later() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder.start();

    let peer_client = relay.join(peer);
    assert_eq!(relay.directory().lobby(lobby).unwrap().pending, vec![peer]);

    let owner_client = relay.join(owner);
    let star = relay.directory().lobby(lobby).unwrap();
    assert_eq!(star.peers, vec![peer]);
    assert!(star.pending.is_empty());

    owner_client.send(b"found you");
    assert_eq!(peer_client.expect_payload(), b"found you");
}

#[test]
fn idle_sessions_expire() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder
        .idle_timeout(Duration::from_millis(300))
        .sweep_interval(Duration::from_millis(50))
        .start();

    let owner_client = relay.join(owner);
    let peer_client = relay.join(peer);
    let peer_addr = peer_client.addr();

    let dir = relay.directory();
    assert!(wait_until(WAIT, || dir.is_empty()));
    assert_eq!(dir.resolve_address(peer), None);
    assert_eq!(dir.resolve_by_address(peer_addr), None);
    assert!(dir.adjacent(owner).is_empty());
    assert!(dir.lobby(lobby).is_none());

    // Expired endpoints relay nothing until they handshake again.
    owner_client.send(b"anyone?");
    peer_client.expect_silence();
}

#[test]
fn new_owner_within_grace_inherits_peers() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let first_owner = builder.member(lobby, true);
    let second_owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder
        .idle_timeout(Duration::from_millis(600))
        .sweep_interval(Duration::from_millis(50))
        .orphan_grace(Duration::from_secs(30))
        .start();

    let _first = relay.join(first_owner);
    let peer_client = relay.join(peer);
    let dir = relay.directory();

    // The peer keeps talking while the first owner goes quiet.
    assert!(wait_until(WAIT, || {
        peer_client.send(b"keepalive");
        dir.session(first_owner).is_none()
    }));
    let star = dir.lobby(lobby).unwrap();
    assert_eq!(star.owner, None);
    assert_eq!(star.peers, vec![peer]);
    assert!(star.orphaned_since.is_some());

    let second = relay.join(second_owner);
    second.send(b"new boss");
    assert_eq!(peer_client.expect_payload(), b"new boss");
}

#[test]
fn orphaned_peers_are_released_after_grace() {
    let lobby = LobbyId::random();
    let mut builder = TestRelayBuilder::new();
    let first_owner = builder.member(lobby, true);
    let second_owner = builder.member(lobby, true);
    let peer = builder.member(lobby, false);
    let relay = builder
        .idle_timeout(Duration::from_millis(600))
        .sweep_interval(Duration::from_millis(50))
        .orphan_grace(Duration::from_millis(200))
        .start();

    let _first = relay.join(first_owner);
    let peer_client = relay.join(peer);
    let dir = relay.directory();

    assert!(wait_until(WAIT, || {
        peer_client.send(b"keepalive");
        dir.session(first_owner).is_none()
            && dir.lobby(lobby).is_some_and(|star| star.pending == vec![peer])
    }));
    // Released peers keep their session but lose the edge.
    assert!(dir.session(peer).is_some());
    assert!(dir.adjacent(peer).is_empty());

    // The next owner picks the peer up without a fresh peer handshake.
    let second = relay.join(second_owner);
    assert_eq!(dir.adjacent(second_owner), vec![peer]);
    second.send(b"hello?");
    assert_eq!(peer_client.expect_payload(), b"hello?");
    peer_client.send(b"still here");
    assert_eq!(second.expect_payload(), b"still here");
}
