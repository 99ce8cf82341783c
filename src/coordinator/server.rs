//! TCP front end for the coordinator
//!
//! An accept thread admits connections for as long as the core thread runs.
//! Only a JOIN places a connection on the roster, so connections that close
//! or never join do not use up a participant slot. Each connection gets a
//! reader thread that decodes lines into events for the core thread, which
//! owns the `CoordinatorCore`.
//!
use std::collections::HashMap;
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{after, never, select, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result, TransportError};
use crate::messages::Message;
use crate::network::link::{self, LinkReader, LinkWriter, ReadOutcome};
use crate::network::{ConnectionId, RosterMessenger};
use crate::vote::{Outcome, ParticipantId, VoteOption};

use super::{CoordinatorCore, State};

#[derive(Debug)]
pub enum Event {
    Connected(ConnectionId),
    Joined(ConnectionId, ParticipantId),
    Reported {
        connection: ConnectionId,
        outcome: Outcome,
        voters: Vec<ParticipantId>
    },
    Lost(ConnectionId)
}

type Links = Arc<Mutex<HashMap<ConnectionId, LinkWriter>>>;

fn lock(links: &Links) -> MutexGuard<'_, HashMap<ConnectionId, LinkWriter>> {
    // A reader thread panicking does not leave the map inconsistent
    links.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TcpRosterMessenger {
    links: Links
}

impl RosterMessenger for TcpRosterMessenger {
    fn send(&self, to: ConnectionId, message: &Message) -> std::result::Result<(), TransportError> {
        match lock(&self.links).get(&to) {
            Some(w) => w.send(message),
            None => Err(TransportError::Closed)
        }
    }

    fn disconnect(&self, connection: ConnectionId) {
        if let Some(w) = lock(&self.links).remove(&connection) {
            w.close();
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener
}

impl Coordinator {
    /// Validates the configuration and starts listening. Participants may
    /// connect as soon as this returns.
    pub fn bind(mut config: CoordinatorConfig) -> Result<Coordinator> {
        config.validate()?;
        let listener = link::listen(&config.host, config.port)?;
        Ok(Coordinator { config, listener })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr().map_err(TransportError::Io)?.port())
    }

    /// Runs the vote to completion and returns the agreed option
    pub fn run(self) -> Result<VoteOption> {
        let expected = self.config.participants;
        let restart_delay = self.config.restart_delay();

        info!("Listening on port {} for {} participant(s), options [{}]", self.local_port()?, expected,
            self.config.options.join(", "));

        let links: Links = Arc::new(Mutex::new(HashMap::new()));
        let (sender, receiver) = unbounded();

        {
            let links = links.clone();
            let listener = self.listener;
            thread::spawn(move || accept_thread(listener, links, sender));
        }

        let net: Rc<dyn RosterMessenger> = Rc::new(TcpRosterMessenger { links });
        let mut core = CoordinatorCore::new(expected, self.config.vote_options(), net);

        event_loop(&mut core, receiver, restart_delay)
    }
}

fn event_loop(core: &mut CoordinatorCore, receiver: Receiver<Event>, restart_delay: std::time::Duration)
    -> Result<VoteOption> {

    let mut restart_timer = never();
    let mut restart_armed = false;
    let mut restart_due = false;

    loop {
        match core.state() {
            State::Decided(option) => return Ok(option.clone()),
            State::Failed => return Err(Error::NoConsensusPossible),
            State::Restarting if !restart_armed => {
                info!("Restarting the vote in {:?}", restart_delay);
                restart_timer = after(restart_delay);
                restart_armed = true;
            },
            _ => ()
        }

        select! {
            recv(receiver) -> event => match event {
                Ok(Event::Connected(connection)) => debug!("{} awaiting JOIN", connection),
                Ok(Event::Joined(connection, id)) => core.joined(connection, id),
                Ok(Event::Reported { connection, outcome, voters }) => core.reported(connection, outcome, voters),
                Ok(Event::Lost(connection)) => core.lost(connection),
                Err(_) => {
                    error!("Every connection is closed");
                    return Err(Error::NoConsensusPossible);
                }
            },
            recv(restart_timer) -> _ => {
                restart_due = true;
            }
        }

        if restart_due {
            restart_due = false;
            restart_timer = never();
            restart_armed = false;
            core.restart();
        }
    }
}

fn accept_thread(listener: TcpListener, links: Links, sender: Sender<Event>) {
    let mut next_connection = 0;

    loop {
        let stream = match listener.accept() {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                stream
            },
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        let (reader, writer) = match link::split(stream) {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Failed to set up accepted connection: {}", e);
                continue;
            }
        };

        let connection = ConnectionId(next_connection);
        next_connection += 1;

        if sender.send(Event::Connected(connection)).is_err() {
            writer.close();
            break;
        }

        lock(&links).insert(connection, writer);

        let sender = sender.clone();
        thread::spawn(move || reader_thread(connection, reader, sender));
    }

    debug!("Vote finished, no longer listening");
}

fn reader_thread(connection: ConnectionId, mut reader: LinkReader, sender: Sender<Event>) {
    loop {
        let event = match reader.read_line() {
            ReadOutcome::Line(line) => match Message::decode(&line) {
                Ok(Message::Join(id)) => Event::Joined(connection, id),
                Ok(Message::Outcome { outcome, voters }) => Event::Reported { connection, outcome, voters },
                Ok(other) => {
                    warn!("Unexpected {} on {}", other.command(), connection);
                    continue;
                },
                Err(e) => {
                    warn!("Discarding malformed line '{}' on {}: {}", line, connection, e);
                    continue;
                }
            },
            ReadOutcome::Timeout => continue,
            ReadOutcome::PeerClosed => Event::Lost(connection),
            ReadOutcome::Failed(e) => {
                debug!("Read on {} failed: {}", connection, e);
                Event::Lost(connection)
            }
        };

        let lost = match event {
            Event::Lost(_) => true,
            _ => false
        };

        if sender.send(event).is_err() || lost {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Duration;

    fn connect(port: u16) -> (LinkReader, LinkWriter) {
        let (reader, writer) = link::split(TcpStream::connect(("127.0.0.1", port)).unwrap()).unwrap();
        reader.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        (reader, writer)
    }

    #[test]
    fn connection_without_join_does_not_take_a_slot() {
        let coordinator = Coordinator::bind(CoordinatorConfig::new(0, 1, &["A", "B"])).unwrap();
        let port = coordinator.local_port().unwrap();
        let handle = thread::spawn(move || coordinator.run());

        // Connects and leaves without ever sending JOIN
        drop(TcpStream::connect(("127.0.0.1", port)).unwrap());

        let (mut reader, writer) = connect(port);
        writer.send(&Message::Join(ParticipantId(7))).unwrap();

        assert_eq!(reader.read_message().unwrap(), Message::Details(vec![]));
        assert_eq!(reader.read_message().unwrap(),
            Message::VoteOptions(vec![VoteOption::from("A"), VoteOption::from("B")]));

        writer.send(&Message::Outcome {
            outcome: Outcome::Decided(VoteOption::from("A")),
            voters: vec![ParticipantId(7)]
        }).unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), VoteOption::from("A"));
    }
}
