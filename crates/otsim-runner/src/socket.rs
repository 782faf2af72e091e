//! UDP transport between the dispatcher and node processes.
//!
//! Each node process talks to the coordinator from its own UDP source
//! address. A dedicated reader thread decodes datagrams into events and
//! pushes them, with the sender's address, into the dispatcher's event
//! channel; the write path serializes onto the shared socket directly from
//! the dispatcher thread.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use otsim_event::Event;
use tracing::{debug, warn};

/// Largest datagram the reader accepts.
const MAX_DATAGRAM: usize = 4096;

/// What the reader thread pushes into the event channel.
#[derive(Debug)]
pub enum ReaderMsg {
    /// A decoded event from a node socket.
    Event(SocketAddr, Event),
    /// A datagram that did not decode.
    ParseError(SocketAddr),
}

/// The dispatcher's socket endpoint.
pub struct NodeTransport {
    socket: UdpSocket,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl NodeTransport {
    /// Bind the coordinator socket on `port` (0 picks a free port) and
    /// start the reader thread feeding `event_tx`.
    pub fn start(port: u16, event_tx: Sender<ReaderMsg>) -> io::Result<NodeTransport> {
        let socket = UdpSocket::bind(("127.0.0.1", port))?;
        // A finite timeout lets the reader notice a shutdown request and
        // exit instead of blocking forever on a quiet socket.
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        let reader_socket = socket.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let reader = thread::Builder::new()
            .name("node-socket-reader".to_string())
            .spawn(move || reader_main(reader_socket, event_tx, reader_stop))
            .expect("failed to spawn socket reader thread");
        Ok(NodeTransport {
            socket,
            stop,
            reader: Some(reader),
        })
    }

    /// The bound local address (useful when `port` was 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send serialized event bytes to a node process.
    pub fn send_to(&self, peer: SocketAddr, data: &[u8]) -> io::Result<()> {
        self.socket.send_to(data, peer).map(|_| ())
    }

    /// Stop and join the reader thread.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for NodeTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn reader_main(socket: UdpSocket, event_tx: Sender<ReaderMsg>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!("node socket read failed: {e}");
                return;
            }
        };

        // A datagram may carry several back-to-back events.
        let mut data = &buf[..len];
        loop {
            match Event::deserialize(data) {
                Ok(Some((event, used))) => {
                    data = &data[used..];
                    if event_tx.send(ReaderMsg::Event(peer, event)).is_err() {
                        debug!("event channel closed, stopping socket reader");
                        return;
                    }
                    if data.is_empty() {
                        break;
                    }
                }
                Ok(None) => {
                    if !data.is_empty() {
                        // Trailing garbage too short to be an event.
                        let _ = event_tx.send(ReaderMsg::ParseError(peer));
                    }
                    break;
                }
                Err(e) => {
                    debug!(%peer, "dropping undecodable datagram: {e}");
                    let _ = event_tx.send(ReaderMsg::ParseError(peer));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use otsim_common::SimTime;

    #[test]
    fn round_trip_over_loopback() {
        let (tx, rx) = unbounded();
        let transport = NodeTransport::start(0, tx).unwrap();
        let addr = transport.local_addr().unwrap();

        // A fake node process sends an alarm event.
        let node_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut event = Event::alarm(0, SimTime::ZERO);
        event.delay = 12_345;
        node_socket.send_to(&event.serialize(), addr).unwrap();

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match msg {
            ReaderMsg::Event(peer, decoded) => {
                assert_eq!(peer, node_socket.local_addr().unwrap());
                assert_eq!(decoded.delay, 12_345);
            }
            other => panic!("expected event, got {other:?}"),
        }

        // And the dispatcher can answer to the node's address.
        transport
            .send_to(node_socket.local_addr().unwrap(), &event.serialize())
            .unwrap();
        let mut buf = [0u8; 64];
        node_socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (n, _) = node_socket.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &event.serialize()[..]);
    }

    #[test]
    fn garbage_datagrams_report_parse_errors() {
        let (tx, rx) = unbounded();
        let transport = NodeTransport::start(0, tx).unwrap();
        let addr = transport.local_addr().unwrap();

        let node_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        node_socket.send_to(&[0xFF; 7], addr).unwrap();

        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(msg, ReaderMsg::ParseError(_)));
    }

    #[test]
    fn two_events_in_one_datagram() {
        let (tx, rx) = unbounded();
        let transport = NodeTransport::start(0, tx).unwrap();
        let addr = transport.local_addr().unwrap();

        let node_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut data = Event::alarm(0, SimTime::ZERO).serialize();
        data.extend_from_slice(&Event::alarm(0, SimTime::ZERO).serialize());
        node_socket.send_to(&data, addr).unwrap();

        for _ in 0..2 {
            let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(msg, ReaderMsg::Event(_, _)));
        }
    }
}
