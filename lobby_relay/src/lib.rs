// lobby_relay: UDP rendezvous-and-relay server for owner/peer lobbies.
//
// Each lobby is a star: one owner, any number of peers. Clients authenticate
// their UDP endpoint with an encrypted handshake (AES-256-GCM under a
// per-user key, carrying a JWT whose subject must match the claimed
// identity). The relay then forwards opaque datagrams between each peer and
// its owner without looking inside them. Sessions are bound to addresses, so
// a client that moves (NAT rebinding, restart) simply handshakes again.
//
// Module overview:
// - `directory.rs`:     Session directory. Identity <-> address bindings,
//                       activity stamps, and the per-lobby owner/peer star,
//                       all behind one lock with atomic operations only.
// - `handshake.rs`:     Control datagram pipeline: frame parse, key lookup,
//                       decrypt, token check, lobby lookup, directory upsert,
//                       acknowledgement.
// - `forward.rs`:       Data datagram relaying along the star.
// - `sweeper.rs`:       Idle-session expiry and orphaned-edge release, run
//                       periodically on its own thread.
// - `engine.rs`:        Per-datagram dispatch and logging.
// - `server.rs`:        UDP socket, receive thread, worker pool, shutdown.
// - `transport.rs`:     `DatagramSink`, the outbound seam tests hook into.
// - `collaborators.rs`: Interfaces to the credential store, token verifier,
//                       and lobby membership service.
// - `registry.rs`:      JSON-file implementation of credentials + membership.
// - `token.rs`:         HS256 JWT verification (and issuance for tooling).
// - `config.rs`:        Layered process configuration.
// - `client.rs`:        UDP client used by tests and tools.
//
// Dependencies: `lobby_relay_protocol` (wire constants, framing, crypto),
// shared with clients.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded via
// the library API (`start_relay`).

pub mod client;
pub mod collaborators;
pub mod config;
pub mod directory;
pub mod engine;
pub mod forward;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod sweeper;
pub mod token;
pub mod transport;

pub use client::{ClientError, RelayClient};
pub use collaborators::{
    Collaborators, CredentialStore, LobbyMembership, LookupError, Membership, TokenClaims,
    TokenError, TokenVerifier,
};
pub use config::{ConfigError, RelayConfig};
pub use directory::SessionDirectory;
pub use registry::{Registry, RegistryError};
pub use server::{RelayHandle, start_relay};
pub use token::JwtAuthority;
