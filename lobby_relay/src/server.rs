// UDP transport loop for the relay.
//
// Architecture: one receive thread, a fixed pool of worker threads, and a
// sweeper thread, all sharing one `UdpSocket` and one `SessionDirectory`.
//
// - **Receive thread**: blocks on `recv_from` (with a 100 ms read timeout so
//   it notices shutdown), copies each datagram out of the receive buffer,
//   and pushes it onto a bounded `sync_channel`. The buffer is one byte
//   larger than `MAX_DATAGRAM_SIZE`, so an oversized datagram (which the
//   socket truncates) is recognised and dropped instead of relayed cut
//   short. If the workers have fallen
//   that far behind the datagram is dropped; UDP callers already tolerate
//   loss and a stalled collaborator must not grow memory without bound.
// - **Worker threads**: take jobs off the shared receiver and run
//   `RelayEngine::handle_datagram`. Each datagram is an independent unit of
//   work; nothing orders datagrams from different senders. Workers send
//   through the same `Arc<UdpSocket>`, since concurrent `send_to` on a UDP
//   socket is safe.
// - **Sweeper thread**: see `sweeper.rs`.
//
// Shutdown (`RelayHandle::stop`): clear `keep_running`, join the receive
// thread (which drops the job sender on exit), let the workers drain what is
// already queued and exit on the disconnected channel, then stop the
// sweeper.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use lobby_relay_protocol::framing::MAX_DATAGRAM_SIZE;
use parking_lot::Mutex;

use crate::collaborators::Collaborators;
use crate::config::RelayConfig;
use crate::directory::SessionDirectory;
use crate::engine::RelayEngine;
use crate::sweeper::{Sweeper, SweeperHandle};

/// How often the receive thread checks `keep_running` while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One received datagram, owned so it can cross to a worker.
struct Job {
    from: SocketAddr,
    bytes: Vec<u8>,
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    receiver: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    sweeper: Option<SweeperHandle>,
    directory: Arc<SessionDirectory>,
}

impl RelayHandle {
    /// The live session directory, for inspection.
    pub fn directory(&self) -> &Arc<SessionDirectory> {
        &self.directory
    }

    /// Stop receiving, drain queued datagrams, and wait for every thread.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        tracing::info!(sessions = self.directory.len(), "relay stopped");
    }
}

/// Bind the relay socket and start all threads. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used to
/// let the OS pick a free port). A config that fails `validate` is rejected
/// with `InvalidInput` before anything is bound.
pub fn start_relay(
    config: RelayConfig,
    collaborators: Collaborators,
) -> std::io::Result<(RelayHandle, SocketAddr)> {
    config
        .validate()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let socket = UdpSocket::bind((config.bind_address, config.port))?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    let addr = socket.local_addr()?;
    let socket = Arc::new(socket);

    let directory = Arc::new(SessionDirectory::new());
    let engine = Arc::new(RelayEngine::new(Arc::clone(&directory), collaborators));
    let keep_running = Arc::new(AtomicBool::new(true));

    let (job_tx, job_rx) = mpsc::sync_channel::<Job>(config.queue_depth);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let mut workers = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        let job_rx = Arc::clone(&job_rx);
        let engine = Arc::clone(&engine);
        let socket = Arc::clone(&socket);
        workers.push(
            thread::Builder::new()
                .name(format!("relay-worker-{index}"))
                .spawn(move || worker_loop(&job_rx, &engine, &socket))?,
        );
    }

    let receiver = {
        let socket = Arc::clone(&socket);
        let keep_running = Arc::clone(&keep_running);
        thread::Builder::new()
            .name("relay-recv".into())
            .spawn(move || receive_loop(&socket, &job_tx, &keep_running))?
    };

    let sweeper = match Sweeper::spawn(
        Arc::clone(&directory),
        config.sweep_policy(),
        config.sweep_interval,
    ) {
        Ok(sweeper) => sweeper,
        Err(error) => {
            keep_running.store(false, Ordering::SeqCst);
            return Err(error);
        }
    };

    tracing::info!(
        %addr,
        workers = config.workers,
        queue_depth = config.queue_depth,
        idle_timeout = ?config.idle_timeout,
        "relay listening"
    );

    Ok((
        RelayHandle {
            keep_running,
            receiver: Some(receiver),
            workers,
            sweeper: Some(sweeper),
            directory,
        },
        addr,
    ))
}

/// Receive loop. Runs until `keep_running` is cleared; dropping `job_tx` on
/// return is what tells the workers to finish.
fn receive_loop(socket: &UdpSocket, job_tx: &SyncSender<Job>, keep_running: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];
    while keep_running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) if len > MAX_DATAGRAM_SIZE => {
                tracing::debug!(%from, "oversized datagram dropped");
            }
            Ok((len, from)) => {
                let job = Job {
                    from,
                    bytes: buf[..len].to_vec(),
                };
                match job_tx.try_send(job) {
                    Ok(()) => {}
                    Err(TrySendError::Full(job)) => {
                        tracing::warn!(from = %job.from, bytes = job.bytes.len(), "job queue full, datagram dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(error) => {
                // ICMP errors from earlier sends surface here on some
                // platforms; they say nothing about the socket itself.
                tracing::debug!(%error, "recv_from failed");
            }
        }
    }
}

/// Worker loop. Exits once the job channel is closed and empty.
fn worker_loop(job_rx: &Mutex<Receiver<Job>>, engine: &RelayEngine, socket: &UdpSocket) {
    loop {
        let job = job_rx.lock().recv();
        match job {
            Ok(job) => {
                engine.handle_datagram(socket, job.from, &job.bytes, Instant::now());
            }
            Err(_) => break,
        }
    }
}
