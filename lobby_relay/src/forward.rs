// Relay forwarding for data datagrams.
//
// A data datagram is relayed verbatim to every identity adjacent to its
// sender: from a peer to its owner, from an owner to all of its peers. The
// sender is whoever the directory has bound to the source address; an
// address with no session cannot relay anything.
//
// Target addresses are resolved at forward time (inside `route`), so an
// identity that rebinds keeps receiving traffic at its new endpoint. Sends
// are independent: one unreachable target never stops delivery to the rest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use lobby_relay_protocol::types::UserId;

use crate::directory::SessionDirectory;
use crate::transport::DatagramSink;

/// Result of relaying one datagram from a known sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forwarded {
    pub sender: UserId,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Forwarder {
    directory: Arc<SessionDirectory>,
}

impl Forwarder {
    pub fn new(directory: Arc<SessionDirectory>) -> Self {
        Self { directory }
    }

    /// Relay `payload` from `from`. Returns `None` when `from` is not bound
    /// to a session.
    pub fn forward<S: DatagramSink + ?Sized>(
        &self,
        sink: &S,
        from: SocketAddr,
        payload: &[u8],
        now: Instant,
    ) -> Option<Forwarded> {
        let route = self.directory.route(from, now)?;
        let mut forwarded = Forwarded {
            sender: route.sender,
            delivered: 0,
            failed: 0,
        };
        for target in route.targets {
            match sink.send_datagram(payload, target) {
                Ok(()) => forwarded.delivered += 1,
                Err(error) => {
                    forwarded.failed += 1;
                    tracing::debug!(sender = %route.sender, %target, %error, "relay send failed");
                }
            }
        }
        Some(forwarded)
    }
}
