// Outbound side of the datagram transport.
//
// The engine never touches a socket directly; it sends through a
// `DatagramSink`. The server passes its shared `UdpSocket` (concurrent
// `send_to` on one UDP socket is safe, so no writer thread is needed) and
// tests pass a recorder.

use std::io;
use std::net::{SocketAddr, UdpSocket};

pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<()>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, payload: &[u8], target: SocketAddr) -> io::Result<()> {
        let sent = UdpSocket::send_to(self, payload, target)?;
        if sent == payload.len() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {sent} of {} bytes", payload.len()),
            ))
        }
    }
}
