// Session directory: the relay's only shared mutable state.
//
// Tracks three things, all behind one `parking_lot::RwLock`:
// - `sessions`:   `UserId -> SessionRecord` (address, lobby, role, last seen).
//                 The authoritative table.
// - `by_address`: `SocketAddr -> UserId`. A reverse index derived from
//                 `sessions`; it is only ever changed in the same critical
//                 section that changes the session it points at, so it can
//                 never name a superseded endpoint.
// - `lobbies`:    `LobbyId -> LobbyStar`, the owner/peer adjacency cache
//                 rebuilt from successful handshakes.
//
// Callers only see the atomic operations below; no guard or map escapes the
// module. Forwarding takes the read lock (`route`), handshakes and evictions
// take the write lock. `last_seen` is an atomic millisecond stamp relative to
// the directory's epoch so the forwarding path can refresh it without
// upgrading to the write lock.
//
// Star bookkeeping:
// - The owner's handshake sets `owner` and promotes every `pending` peer
//   (peers that arrived before any owner) to a real edge.
// - A peer's handshake adds an edge if an owner is registered, otherwise the
//   peer waits in `pending`.
// - Evicting the owner leaves `peers` in place and stamps `orphaned_since`.
//   Edges are keyed by identity, so a new owner handshake relinks them all;
//   if none arrives within the grace period the sweeper drops the edges and
//   parks the peers back in `pending` (`release_orphans`), where the next
//   owner handshake picks them up like any early peer.
//
// Time is always passed in as an `Instant` so tests can drive expiry without
// sleeping.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lobby_relay_protocol::types::{LobbyId, Role, UserId};
use parking_lot::RwLock;

/// Concurrent-safe store of sessions and lobby adjacency.
pub struct SessionDirectory {
    epoch: Instant,
    state: RwLock<DirectoryState>,
}

#[derive(Default)]
struct DirectoryState {
    sessions: HashMap<UserId, SessionRecord>,
    by_address: HashMap<SocketAddr, UserId>,
    lobbies: HashMap<LobbyId, LobbyStar>,
}

struct SessionRecord {
    address: SocketAddr,
    lobby: LobbyId,
    role: Role,
    last_seen_ms: AtomicU64,
}

#[derive(Default)]
struct LobbyStar {
    owner: Option<UserId>,
    peers: BTreeSet<UserId>,
    pending: BTreeSet<UserId>,
    orphaned_since: Option<Instant>,
}

impl LobbyStar {
    fn is_empty(&self) -> bool {
        self.owner.is_none() && self.peers.is_empty() && self.pending.is_empty()
    }
}

/// Point-in-time copy of one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub user: UserId,
    pub address: SocketAddr,
    pub lobby: LobbyId,
    pub role: Role,
    pub last_seen: Instant,
}

/// Point-in-time copy of one lobby's star.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LobbyInfo {
    pub owner: Option<UserId>,
    pub peers: Vec<UserId>,
    pub pending: Vec<UserId>,
    pub orphaned_since: Option<Instant>,
}

/// What an `upsert_session` changed besides the session itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Upsert {
    /// The identity's previous address, if it moved.
    pub rebound_from: Option<SocketAddr>,
    /// Another identity that held the new address and was evicted.
    pub displaced: Option<UserId>,
    /// Peers that gained an edge to their owner in this update.
    pub linked: Vec<UserId>,
}

/// Forwarding decision for one data datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub sender: UserId,
    pub targets: Vec<SocketAddr>,
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: RwLock::new(DirectoryState::default()),
        }
    }

    fn stamp(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }

    /// Install or replace the session for `user` and update its lobby star,
    /// all in one critical section. This is the whole of a handshake's
    /// directory mutation.
    pub fn upsert_session(
        &self,
        user: UserId,
        address: SocketAddr,
        lobby: LobbyId,
        role: Role,
        now: Instant,
    ) -> Upsert {
        let stamp = self.stamp(now);
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut upsert = Upsert::default();

        let holder = state.by_address.get(&address).copied();
        if let Some(holder) = holder.filter(|h| *h != user) {
            state.remove_session(holder, now);
            upsert.displaced = Some(holder);
        }

        if let Some(previous) = state.sessions.remove(&user) {
            if previous.address != address {
                if state.by_address.get(&previous.address) == Some(&user) {
                    state.by_address.remove(&previous.address);
                }
                upsert.rebound_from = Some(previous.address);
            }
            if previous.lobby != lobby || previous.role != role {
                state.detach(user, previous.lobby, now);
            }
        }

        state.sessions.insert(
            user,
            SessionRecord {
                address,
                lobby,
                role,
                last_seen_ms: AtomicU64::new(stamp),
            },
        );
        state.by_address.insert(address, user);
        upsert.linked = state.attach(user, lobby, role);
        upsert
    }

    /// Identity currently bound to `address`.
    pub fn resolve_by_address(&self, address: SocketAddr) -> Option<UserId> {
        self.state.read().by_address.get(&address).copied()
    }

    /// Current address of `user`.
    pub fn resolve_address(&self, user: UserId) -> Option<SocketAddr> {
        self.state.read().sessions.get(&user).map(|r| r.address)
    }

    /// Link `peer` to `owner` in `lobby`. Does nothing unless `owner` is the
    /// lobby's registered owner and `peer` holds a live peer session in the
    /// same lobby. Returns true when a new edge was created.
    pub fn add_peer_edge(&self, lobby: LobbyId, owner: UserId, peer: UserId) -> bool {
        self.state.write().link_peer(lobby, owner, peer)
    }

    /// Identities that `user`'s payloads are forwarded to.
    pub fn adjacent(&self, user: UserId) -> Vec<UserId> {
        self.state.read().adjacent(user)
    }

    /// Resolve the sender of a data datagram, refresh its activity stamp, and
    /// collect the current addresses of everything adjacent to it. `None` for
    /// unbound addresses.
    pub fn route(&self, address: SocketAddr, now: Instant) -> Option<Route> {
        let stamp = self.stamp(now);
        let state = self.state.read();
        let sender = *state.by_address.get(&address)?;
        let record = state.sessions.get(&sender)?;
        record.last_seen_ms.fetch_max(stamp, Ordering::Relaxed);

        let targets = state
            .adjacent(sender)
            .into_iter()
            .filter_map(|id| state.sessions.get(&id).map(|r| r.address))
            .collect();
        Some(Route { sender, targets })
    }

    /// Remove `user`'s session, its reverse mapping, and every edge that
    /// references it. Returns false if there was no session.
    pub fn evict(&self, user: UserId, now: Instant) -> bool {
        self.state.write().remove_session(user, now)
    }

    /// Like `evict`, but only if the session is still idle for longer than
    /// `idle` when the write lock is taken. A handshake or payload that
    /// landed after the sweeper's snapshot keeps the session alive.
    pub fn evict_if_idle(&self, user: UserId, idle: Duration, now: Instant) -> bool {
        let stamp = self.stamp(now);
        let mut state = self.state.write();
        let expired = state
            .sessions
            .get(&user)
            .is_some_and(|r| is_idle(r, idle, stamp));
        expired && state.remove_session(user, now)
    }

    /// Identities whose last activity is more than `idle` before `now`.
    pub fn snapshot_expired(&self, idle: Duration, now: Instant) -> Vec<UserId> {
        let stamp = self.stamp(now);
        self.state
            .read()
            .sessions
            .iter()
            .filter(|(_, r)| is_idle(r, idle, stamp))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Lobbies whose owner has been gone for at least `grace` while peer
    /// edges remain.
    pub fn snapshot_orphaned(&self, grace: Duration, now: Instant) -> Vec<LobbyId> {
        self.state
            .read()
            .lobbies
            .iter()
            .filter(|(_, star)| is_orphan_expired(star, grace, now))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drop the peer edges of an orphaned lobby once its grace period has
    /// elapsed. The peers keep their sessions and wait in `pending` until
    /// an owner handshakes into the lobby. Returns the released peers.
    pub fn release_orphans(&self, lobby: LobbyId, grace: Duration, now: Instant) -> Vec<UserId> {
        let mut state = self.state.write();
        let Some(star) = state.lobbies.get_mut(&lobby) else {
            return Vec::new();
        };
        if !is_orphan_expired(star, grace, now) {
            return Vec::new();
        }
        let released = std::mem::take(&mut star.peers);
        star.pending.extend(released.iter().copied());
        star.orphaned_since = None;
        released.into_iter().collect()
    }

    pub fn session(&self, user: UserId) -> Option<SessionInfo> {
        self.state.read().sessions.get(&user).map(|r| SessionInfo {
            user,
            address: r.address,
            lobby: r.lobby,
            role: r.role,
            last_seen: self.epoch + Duration::from_millis(r.last_seen_ms.load(Ordering::Relaxed)),
        })
    }

    pub fn lobby(&self, lobby: LobbyId) -> Option<LobbyInfo> {
        self.state.read().lobbies.get(&lobby).map(|star| LobbyInfo {
            owner: star.owner,
            peers: star.peers.iter().copied().collect(),
            pending: star.pending.iter().copied().collect(),
            orphaned_since: star.orphaned_since,
        })
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_idle(record: &SessionRecord, idle: Duration, stamp: u64) -> bool {
    let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
    stamp.saturating_sub(record.last_seen_ms.load(Ordering::Relaxed)) > idle_ms
}

fn is_orphan_expired(star: &LobbyStar, grace: Duration, now: Instant) -> bool {
    star.owner.is_none()
        && !star.peers.is_empty()
        && star
            .orphaned_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
}

impl DirectoryState {
    fn adjacent(&self, user: UserId) -> Vec<UserId> {
        let Some(record) = self.sessions.get(&user) else {
            return Vec::new();
        };
        let Some(star) = self.lobbies.get(&record.lobby) else {
            return Vec::new();
        };
        match record.role {
            Role::Owner if star.owner == Some(user) => star.peers.iter().copied().collect(),
            Role::Owner => Vec::new(),
            Role::Peer => match star.owner {
                Some(owner) if star.peers.contains(&user) => vec![owner],
                _ => Vec::new(),
            },
        }
    }

    fn link_peer(&mut self, lobby: LobbyId, owner: UserId, peer: UserId) -> bool {
        let live_peer = self
            .sessions
            .get(&peer)
            .is_some_and(|r| r.lobby == lobby && r.role == Role::Peer);
        if !live_peer {
            return false;
        }
        let Some(star) = self.lobbies.get_mut(&lobby) else {
            return false;
        };
        if star.owner != Some(owner) {
            return false;
        }
        star.pending.remove(&peer);
        star.peers.insert(peer)
    }

    /// Put a freshly installed session into its lobby star. Returns the
    /// peers that gained an edge.
    fn attach(&mut self, user: UserId, lobby: LobbyId, role: Role) -> Vec<UserId> {
        let star = self.lobbies.entry(lobby).or_default();
        match role {
            Role::Owner => {
                star.owner = Some(user);
                star.orphaned_since = None;
                let waiting = std::mem::take(&mut star.pending);
                waiting
                    .into_iter()
                    .filter(|peer| star.peers.insert(*peer))
                    .collect()
            }
            Role::Peer => {
                let owner = star.owner;
                match owner {
                    Some(owner) => {
                        if self.link_peer(lobby, owner, user) {
                            vec![user]
                        } else {
                            Vec::new()
                        }
                    }
                    None => {
                        // Orphaned stars keep their edges for the new owner.
                        if !star.peers.contains(&user) {
                            star.pending.insert(user);
                        }
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Take `user` out of `lobby`'s star, orphaning the star if `user` was
    /// its owner.
    fn detach(&mut self, user: UserId, lobby: LobbyId, now: Instant) {
        let Some(star) = self.lobbies.get_mut(&lobby) else {
            return;
        };
        if star.owner == Some(user) {
            star.owner = None;
            star.orphaned_since = Some(now);
        }
        star.peers.remove(&user);
        star.pending.remove(&user);
        if star.peers.is_empty() {
            star.orphaned_since = None;
        }
        if star.is_empty() {
            self.lobbies.remove(&lobby);
        }
    }

    fn remove_session(&mut self, user: UserId, now: Instant) -> bool {
        let Some(record) = self.sessions.remove(&user) else {
            return false;
        };
        if self.by_address.get(&record.address) == Some(&user) {
            self.by_address.remove(&record.address);
        }
        self.detach(user, record.lobby, now);
        true
    }
}
