//! Peer mesh
//!
//! Every pair of participants shares one link. The participant with the lower
//! port connects and opens the link with `JOIN <port>`; the other accepts.
//! Establishment completes when every link is up, or fails at the deadline.
//!
use std::collections::{BTreeMap, BTreeSet};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::error::{Error, Result, TransportError};
use crate::messages::Message;
use crate::network::link::{self, LinkReader, LinkWriter, ReadOutcome};
use crate::network::MeshMessenger;
use crate::vote::ParticipantId;

use super::node::Event;

pub struct PeerLink {
    pub peer: ParticipantId,
    pub reader: LinkReader,
    pub writer: LinkWriter
}

/// Opens a link to every peer. `listener` must already be bound to our own port.
pub fn establish(
    own: ParticipantId,
    host: &str,
    listener: TcpListener,
    peers: &BTreeSet<ParticipantId>,
    deadline: Instant) -> Result<Vec<PeerLink>> {

    let (sender, receiver) = unbounded::<Result<PeerLink>>();

    let lower: BTreeSet<ParticipantId> = peers.iter().copied().filter(|p| *p < own).collect();

    for peer in peers.iter().copied().filter(|p| *p > own) {
        let addr = link::resolve(host, peer.port())?;
        let sender = sender.clone();
        thread::spawn(move || {
            let _ = sender.send(connect(own, peer, addr, deadline));
        });
    }

    if !lower.is_empty() {
        let sender = sender.clone();
        thread::spawn(move || accept_thread(listener, lower, deadline, sender));
    }

    drop(sender);

    let expected = peers.len();
    let mut links = Vec::with_capacity(expected);

    while links.len() < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(Ok(link)) => {
                info!("Link to {} established ({} of {})", link.peer, links.len() + 1, expected);
                links.push(link);
            },
            Ok(Err(e)) => return Err(e),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::MeshTimeout { established: links.len(), expected });
            }
        }
    }

    Ok(links)
}

fn connect(own: ParticipantId, peer: ParticipantId, addr: std::net::SocketAddr, deadline: Instant)
    -> Result<PeerLink> {

    let stream = link::connect_with_retry(addr, deadline)?;
    let (reader, writer) = link::split(stream)?;
    writer.send(&Message::Join(own))?;
    Ok(PeerLink { peer, reader, writer })
}

fn accept_thread(
    listener: TcpListener,
    mut pending: BTreeSet<ParticipantId>,
    deadline: Instant,
    sender: Sender<Result<PeerLink>>) {

    while !pending.is_empty() {
        let (stream, addr) = match listener.accept() {
            Ok(s) => s,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        let (mut reader, writer) = match link::split(stream) {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Failed to set up the connection from {}: {}", addr, e);
                continue;
            }
        };

        match handshake(&mut reader, &pending, deadline) {
            Ok(peer) => {
                pending.remove(&peer);
                if sender.send(Ok(PeerLink { peer, reader, writer })).is_err() {
                    return;
                }
            },
            Err(e) => {
                warn!("Rejecting connection from {}: {}", addr, e);
                writer.close();
            }
        }
    }
}

/// Reads the JOIN that opens an inbound peer link
fn handshake(reader: &mut LinkReader, pending: &BTreeSet<ParticipantId>, deadline: Instant)
    -> Result<ParticipantId> {

    let remaining = deadline.saturating_duration_since(Instant::now());
    reader.set_read_timeout(Some(remaining.max(Duration::from_millis(1)))).map_err(TransportError::Io)?;

    let peer = match reader.read_message()? {
        Message::Join(peer) if pending.contains(&peer) => peer,
        other => return Err(Error::UnexpectedMessage {
            expected: "JOIN from a lower numbered peer",
            received: other.to_string()
        })
    };

    reader.set_read_timeout(None).map_err(TransportError::Io)?;
    Ok(peer)
}

/// Services one peer link until it fails. Read timeouts are reported but do not
/// end the link; the core decides what they mean.
pub fn spawn_reader(peer: ParticipantId, mut reader: LinkReader, timeout: Duration, sender: Sender<Event>)
    -> Result<()> {

    reader.set_read_timeout(Some(timeout)).map_err(TransportError::Io)?;

    thread::spawn(move || loop {
        let event = match reader.read_line() {
            ReadOutcome::Line(line) => match Message::decode(&line) {
                Ok(Message::Vote(votes)) => Event::Voted { from: peer, votes },
                Ok(other) => {
                    warn!("Protocol violation: unexpected {} from {}", other.command(), peer);
                    continue;
                },
                Err(e) => {
                    warn!("Discarding malformed line '{}' from {}: {}", line, peer, e);
                    continue;
                }
            },
            ReadOutcome::Timeout => Event::Silent(peer),
            ReadOutcome::PeerClosed => Event::Lost(peer),
            ReadOutcome::Failed(e) => {
                debug!("Read from {} failed: {}", peer, e);
                Event::Lost(peer)
            }
        };

        let lost = match event {
            Event::Lost(_) => true,
            _ => false
        };

        if sender.send(event).is_err() || lost {
            break;
        }
    });

    Ok(())
}

/// Outbound side of the mesh and of the coordinator link
pub struct TcpMeshMessenger {
    peers: BTreeMap<ParticipantId, LinkWriter>,
    coordinator: LinkWriter
}

impl TcpMeshMessenger {
    pub fn new(peers: BTreeMap<ParticipantId, LinkWriter>, coordinator: LinkWriter) -> TcpMeshMessenger {
        TcpMeshMessenger { peers, coordinator }
    }

    /// Shuts down every link, which also releases the reader threads
    pub fn close_all(&self) {
        for w in self.peers.values() {
            w.close();
        }
        self.coordinator.close();
    }
}

impl MeshMessenger for TcpMeshMessenger {
    fn send_to_peer(&self, peer: ParticipantId, message: &Message) -> std::result::Result<(), TransportError> {
        match self.peers.get(&peer) {
            Some(w) => w.send(message),
            None => Err(TransportError::Closed)
        }
    }

    fn send_to_coordinator(&self, message: &Message) -> std::result::Result<(), TransportError> {
        self.coordinator.send(message)
    }

    fn disconnect_peer(&self, peer: ParticipantId) {
        if let Some(w) = self.peers.get(&peer) {
            w.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_ports(n: usize) -> Vec<(u16, TcpListener)> {
        let mut v: Vec<(u16, TcpListener)> = (0..n).map(|_| {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            (l.local_addr().unwrap().port(), l)
        }).collect();
        v.sort_by_key(|(p, _)| *p);
        v
    }

    #[test]
    fn three_way_mesh() {
        let mut ports = free_ports(3);
        let ids: Vec<ParticipantId> = ports.iter().map(|(p, _)| ParticipantId(*p)).collect();
        let deadline = Instant::now() + Duration::from_secs(5);

        let mut handles = Vec::new();
        for (port, listener) in ports.drain(..) {
            let own = ParticipantId(port);
            let peers: BTreeSet<ParticipantId> = ids.iter().copied().filter(|p| *p != own).collect();
            handles.push(thread::spawn(move || {
                let links = establish(own, "127.0.0.1", listener, &peers, deadline).unwrap();
                let mut linked: Vec<ParticipantId> = links.iter().map(|l| l.peer).collect();
                linked.sort();
                (peers.into_iter().collect::<Vec<_>>(), linked, links)
            }));
        }

        for h in handles {
            let (peers, linked, _links) = h.join().unwrap();
            assert_eq!(peers, linked);
        }
    }

    #[test]
    fn missing_peer_times_out() {
        let mut ports = free_ports(2);
        let (high, _) = ports.pop().unwrap();
        let (low, listener) = ports.pop().unwrap();

        // The higher peer never connects
        let peers: BTreeSet<ParticipantId> = vec![ParticipantId(high)].into_iter().collect();
        let r = establish(ParticipantId(low), "127.0.0.1", listener, &peers,
            Instant::now() + Duration::from_millis(200));

        match r {
            Err(Error::Transport(TransportError::ConnectTimeout { .. })) => (),
            other => panic!("unexpected {:?}", other.map(|l| l.len()))
        }
    }

    #[test]
    fn lower_peer_that_never_connects_times_out() {
        let mut ports = free_ports(2);
        let (high, listener) = ports.pop().unwrap();
        let (low, _) = ports.pop().unwrap();

        let peers: BTreeSet<ParticipantId> = vec![ParticipantId(low)].into_iter().collect();
        let r = establish(ParticipantId(high), "127.0.0.1", listener, &peers,
            Instant::now() + Duration::from_millis(200));

        match r {
            Err(Error::MeshTimeout { established: 0, expected: 1 }) => (),
            other => panic!("unexpected {:?}", other.map(|l| l.len()))
        }
    }

    #[test]
    fn garbled_bytes_do_not_drop_the_peer() {
        use std::io::Write;
        use std::net::TcpStream;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let (reader, _writer) = link::split(server).unwrap();

        let (sender, receiver) = unbounded();
        spawn_reader(ParticipantId(9), reader, Duration::from_secs(5), sender).unwrap();

        (&client).write_all(b"VOTE 9 \xc3\x28\nVOTE 9 A\n").unwrap();

        match receiver.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Voted { from, votes } => {
                assert_eq!(from, ParticipantId(9));
                assert_eq!(votes, vec![(ParticipantId(9), crate::vote::VoteOption::from("A"))]);
            },
            other => panic!("unexpected {:?}", other)
        }
    }
}
