// Per-datagram dispatch.
//
// `RelayEngine` is what each worker thread runs for every received datagram:
// classify it, send control datagrams through the handshake processor and
// data datagrams through the forwarder, and log the outcome. It holds no
// state of its own beyond the shared directory, so one engine is shared by
// all workers behind an `Arc`.
//
// Log levels follow how much an operator can do about each case:
// malformed input at `debug`, rejected credentials and collaborator
// outages at `warn`, unknown data senders at `trace`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use lobby_relay_protocol::framing::{self, Datagram};

use crate::collaborators::Collaborators;
use crate::directory::SessionDirectory;
use crate::forward::Forwarder;
use crate::handshake::{FailureKind, HandshakeProcessor};
use crate::transport::DatagramSink;

/// What happened to one datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was sent and nothing changed.
    Dropped,
    /// A handshake succeeded and the session is bound.
    Acknowledged,
    /// A data datagram was relayed to this many targets.
    Forwarded(usize),
}

pub struct RelayEngine {
    directory: Arc<SessionDirectory>,
    handshakes: HandshakeProcessor,
    forwarder: Forwarder,
}

impl RelayEngine {
    pub fn new(directory: Arc<SessionDirectory>, collaborators: Collaborators) -> Self {
        Self {
            handshakes: HandshakeProcessor::new(Arc::clone(&directory), collaborators),
            forwarder: Forwarder::new(Arc::clone(&directory)),
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Process one datagram received from `from`.
    pub fn handle_datagram<S: DatagramSink + ?Sized>(
        &self,
        sink: &S,
        from: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Outcome {
        match framing::classify(datagram) {
            None => Outcome::Dropped,
            Some(Datagram::Control(bytes)) => self.handle_control(sink, from, bytes, now),
            Some(Datagram::Data(payload)) => self.handle_data(sink, from, payload, now),
        }
    }

    fn handle_control<S: DatagramSink + ?Sized>(
        &self,
        sink: &S,
        from: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Outcome {
        match self.handshakes.process(sink, from, datagram, now) {
            Ok(established) => {
                tracing::info!(
                    user = %established.user,
                    lobby = %established.lobby,
                    role = ?established.role,
                    %from,
                    rebound_from = ?established.upsert.rebound_from,
                    linked = established.upsert.linked.len(),
                    "session established"
                );
                if let Some(displaced) = established.upsert.displaced {
                    tracing::info!(%displaced, %from, "address claimed by another identity");
                }
                Outcome::Acknowledged
            }
            Err(error) => {
                let kind = error.kind();
                match kind {
                    FailureKind::Malformed => {
                        tracing::debug!(%from, %error, kind = kind.as_str(), "handshake dropped");
                    }
                    FailureKind::Authentication
                    | FailureKind::Authorization
                    | FailureKind::Unavailable => {
                        tracing::warn!(%from, %error, kind = kind.as_str(), "handshake rejected");
                    }
                }
                Outcome::Dropped
            }
        }
    }

    fn handle_data<S: DatagramSink + ?Sized>(
        &self,
        sink: &S,
        from: SocketAddr,
        payload: &[u8],
        now: Instant,
    ) -> Outcome {
        match self.forwarder.forward(sink, from, payload, now) {
            Some(forwarded) => {
                tracing::trace!(
                    sender = %forwarded.sender,
                    bytes = payload.len(),
                    delivered = forwarded.delivered,
                    failed = forwarded.failed,
                    "relayed"
                );
                Outcome::Forwarded(forwarded.delivered)
            }
            None => {
                tracing::trace!(%from, bytes = payload.len(), "data from unbound address");
                Outcome::Dropped
            }
        }
    }
}
