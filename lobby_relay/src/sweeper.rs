// Periodic expiry sweep over the session directory.
//
// One pass (`sweep`) does two things:
// - evicts every session idle for longer than `idle_timeout`. Detection
//   (`snapshot_expired`, read lock) is separate from mutation
//   (`evict_if_idle`, write lock per identity), and the eviction re-checks
//   idleness so a session refreshed in between survives.
// - releases the peer edges of lobbies whose owner has been gone for at
//   least `orphan_grace`. Released peers wait for the lobby's next owner.
//
// `Sweeper::spawn` runs passes on a dedicated thread. The thread waits on an
// mpsc receiver with `recv_timeout(interval)`: a timeout means "sweep now",
// a message or a dropped sender means "stop". That gives a timer and a stop
// signal in one primitive and lets `stop()` return promptly instead of
// waiting out the interval.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lobby_relay_protocol::types::{LobbyId, UserId};

use crate::directory::SessionDirectory;

/// Thresholds applied by each sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    pub idle_timeout: Duration,
    pub orphan_grace: Duration,
}

/// What one sweep removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<UserId>,
    /// Lobbies whose orphaned peer edges were dropped, with the peers.
    pub released: Vec<(LobbyId, Vec<UserId>)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.released.is_empty()
    }
}

/// Run one sweep pass as of `now`.
pub fn sweep(directory: &SessionDirectory, policy: SweepPolicy, now: Instant) -> SweepReport {
    let mut report = SweepReport::default();

    for user in directory.snapshot_expired(policy.idle_timeout, now) {
        if directory.evict_if_idle(user, policy.idle_timeout, now) {
            report.expired.push(user);
        }
    }

    for lobby in directory.snapshot_orphaned(policy.orphan_grace, now) {
        let peers = directory.release_orphans(lobby, policy.orphan_grace, now);
        if !peers.is_empty() {
            report.released.push((lobby, peers));
        }
    }

    report
}

/// Background sweep thread.
pub struct Sweeper;

impl Sweeper {
    pub fn spawn(
        directory: Arc<SessionDirectory>,
        policy: SweepPolicy,
        interval: Duration,
    ) -> std::io::Result<SweeperHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("relay-sweeper".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let report = sweep(&directory, policy, Instant::now());
                            for user in &report.expired {
                                tracing::debug!(%user, "session expired");
                            }
                            for (lobby, peers) in &report.released {
                                tracing::debug!(%lobby, peers = peers.len(), "orphaned peers released");
                            }
                            if !report.is_empty() {
                                tracing::info!(
                                    expired = report.expired.len(),
                                    released = report.released.len(),
                                    live = directory.len(),
                                    "sweep"
                                );
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(SweeperHandle {
            stop_tx,
            thread: Some(thread),
        })
    }
}

/// Handle for stopping the sweep thread.
pub struct SweeperHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
