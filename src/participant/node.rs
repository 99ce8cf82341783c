//! A participant process
//!
//! Runs the startup sequence against the coordinator, builds the mesh and then
//! drives a `ParticipantCore` from a single event loop fed by the reader
//! threads and the round timer.
//!
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::rc::Rc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{after, never, select, unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::config::ParticipantConfig;
use crate::error::{ConfigError, Error, Result, TransportError};
use crate::messages::Message;
use crate::network::link::{self, LinkReader, ReadOutcome};
use crate::vote::{ParticipantId, VoteOption};

use super::chooser::{RandomChooser, VoteChooser};
use super::mesh::{self, TcpMeshMessenger};
use super::{validate_peers, ParticipantCore, Phase};

#[derive(Debug)]
pub enum Event {
    Voted {
        from: ParticipantId,
        votes: Vec<(ParticipantId, VoteOption)>
    },
    /// A peer link's read timeout expired
    Silent(ParticipantId),
    Lost(ParticipantId),
    Restart,
    CoordinatorClosed
}

pub struct Participant {
    id: ParticipantId,
    config: ParticipantConfig,
    listener: TcpListener,
    chooser: Box<dyn VoteChooser + Send>
}

impl Participant {
    /// Validates the configuration and binds the peer listener
    pub fn bind(config: ParticipantConfig) -> Result<Participant> {
        config.validate()?;
        let listener = link::listen(&config.host, config.port)?;
        Ok(Participant {
            id: ParticipantId(config.port),
            config,
            listener,
            chooser: Box::new(RandomChooser::new())
        })
    }

    pub fn with_chooser(mut self, chooser: Box<dyn VoteChooser + Send>) -> Participant {
        self.chooser = chooser;
        self
    }

    pub fn id(&self) -> ParticipantId { self.id }

    /// Takes part in the vote until the coordinator hangs up after a decisive
    /// outcome. Returns the agreed option.
    pub fn run(self) -> Result<VoteOption> {
        let Participant { id, config, listener, mut chooser } = self;

        let deadline = Instant::now() + config.connect_timeout();
        let addr = link::resolve(&config.host, config.coordinator_port)?;
        let stream = link::connect_with_retry(addr, deadline)?;
        let (mut coordinator, coordinator_writer) = link::split(stream)?;

        coordinator_writer.send(&Message::Join(id))?;
        info!("Joined the coordinator at {}", addr);

        let peers = await_details(&mut coordinator)?;
        let peers = validate_peers(id, &peers)?;
        info!("Peers: [{}]", peers.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", "));

        let options = await_options(&mut coordinator)?;
        if options.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "options",
                reason: "the coordinator sent no vote options".to_string()
            }.into());
        }

        let chosen = chooser.choose(&options);
        info!("Options [{}], voting {}", options.iter().map(|o| o.as_str()).collect::<Vec<_>>().join(", "),
            chosen);

        let deadline = Instant::now() + config.connect_timeout();
        let links = mesh::establish(id, &config.host, listener, &peers, deadline)?;

        let (sender, receiver) = unbounded();
        let mut writers = BTreeMap::new();

        for l in links {
            mesh::spawn_reader(l.peer, l.reader, config.timeout(), sender.clone())?;
            writers.insert(l.peer, l.writer);
        }

        {
            let sender = sender.clone();
            thread::spawn(move || coordinator_reader(coordinator, sender));
        }
        drop(sender);

        info!("Mesh of {} peer(s) is live", writers.len());

        let net = Rc::new(TcpMeshMessenger::new(writers, coordinator_writer));

        thread::sleep(config.settle_delay());

        let mut core = ParticipantCore::new(id, peers, options, chosen, chooser, config.timeout(),
            config.failure_mode, net.clone());

        let result = event_loop(&mut core, receiver, &config);

        net.close_all();

        result
    }
}

fn event_loop(core: &mut ParticipantCore, receiver: Receiver<Event>, config: &ParticipantConfig)
    -> Result<VoteOption> {

    let idle = never();
    let mut round_timer = after(config.first_round());

    core.start();

    loop {
        if let Some(e) = core.phase().failure() {
            return Err(e);
        }

        let mut next_round = None;

        {
            let timer = if core.is_voting() { &round_timer } else { &idle };

            select! {
                recv(receiver) -> event => match event {
                    Ok(Event::Voted { from, votes }) => core.receive_votes(from, votes, Instant::now()),
                    Ok(Event::Silent(peer)) => core.peer_silent(peer, Instant::now()),
                    Ok(Event::Lost(peer)) => core.peer_lost(peer, Instant::now()),
                    Ok(Event::Restart) => {
                        info!("Coordinator requested a restart");
                        core.restart();
                        next_round = Some(config.first_round());
                    },
                    Ok(Event::CoordinatorClosed) | Err(_) => {
                        return match core.phase() {
                            Phase::Decided(option) => {
                                info!("Coordinator closed the vote on {}", option);
                                Ok(option.clone())
                            },
                            _ => Err(Error::CoordinatorLost)
                        };
                    }
                },
                recv(timer) -> _ => {
                    core.tick(Instant::now());
                    next_round = Some(config.round_interval());
                }
            }
        }

        if let Some(interval) = next_round {
            round_timer = after(interval);
        }
    }
}

fn await_details(reader: &mut LinkReader) -> Result<Vec<ParticipantId>> {
    loop {
        match read_coordinator(reader)? {
            Some(Message::Details(peers)) => return Ok(peers),
            Some(other) => warn!("Expected DETAILS, ignoring {}", other),
            None => ()
        }
    }
}

fn await_options(reader: &mut LinkReader) -> Result<Vec<VoteOption>> {
    loop {
        match read_coordinator(reader)? {
            Some(Message::VoteOptions(options)) => return Ok(options),
            Some(other) => warn!("Expected VOTE_OPTIONS, ignoring {}", other),
            None => ()
        }
    }
}

/// Malformed lines are logged and yield None
fn read_coordinator(reader: &mut LinkReader) -> Result<Option<Message>> {
    match reader.read_message() {
        Ok(m) => Ok(Some(m)),
        Err(Error::Decode(e)) => {
            warn!("Discarding malformed line from the coordinator: {}", e);
            Ok(None)
        },
        Err(Error::Transport(TransportError::Closed)) => Err(Error::CoordinatorLost),
        Err(e) => Err(e)
    }
}

fn coordinator_reader(mut reader: LinkReader, sender: Sender<Event>) {
    loop {
        let event = match reader.read_line() {
            ReadOutcome::Line(line) => match Message::decode(&line) {
                Ok(Message::Restart) => Event::Restart,
                Ok(other) => {
                    warn!("Unexpected {} from the coordinator", other.command());
                    continue;
                },
                Err(e) => {
                    warn!("Discarding malformed line '{}' from the coordinator: {}", line, e);
                    continue;
                }
            },
            ReadOutcome::Timeout => continue,
            ReadOutcome::PeerClosed => Event::CoordinatorClosed,
            ReadOutcome::Failed(e) => {
                debug!("Read from the coordinator failed: {}", e);
                Event::CoordinatorClosed
            }
        };

        let closed = match event {
            Event::CoordinatorClosed => true,
            _ => false
        };

        if sender.send(event).is_err() || closed {
            break;
        }
    }
}
