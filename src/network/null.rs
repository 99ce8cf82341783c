use std::cell::RefCell;
use std::collections::HashSet;
use std::rc;

use crate::error::TransportError;
use crate::messages::Message;
use crate::network::*;
use crate::vote::ParticipantId;

pub struct NullMeshState {
    pub to_peers: Vec<(ParticipantId, Message)>,
    pub to_coordinator: Vec<Message>,
    pub disconnected: Vec<ParticipantId>,
    /// Sends to these peers fail as though the socket had been reset
    pub broken: HashSet<ParticipantId>
}

impl NullMeshState {
    /// Messages sent to `peer`, in order
    pub fn sent_to(&self, peer: ParticipantId) -> Vec<Message> {
        self.to_peers.iter().filter(|(p, _)| *p == peer).map(|(_, m)| m.clone()).collect()
    }
}

/// Records everything a ParticipantCore sends
pub struct NullMeshMessenger {
    state: rc::Rc<RefCell<NullMeshState>>
}

impl NullMeshMessenger {
    pub fn new() -> (rc::Rc<RefCell<NullMeshState>>, rc::Rc<dyn MeshMessenger>) {
        let s = rc::Rc::new( RefCell::new(NullMeshState {
            to_peers: Vec::new(),
            to_coordinator: Vec::new(),
            disconnected: Vec::new(),
            broken: HashSet::new()
        }));

        let n = rc::Rc::new( NullMeshMessenger {
            state: s.clone()
        });

        (s, n)
    }
}

impl MeshMessenger for NullMeshMessenger {
    fn send_to_peer(&self, peer: ParticipantId, message: &Message) -> Result<(), TransportError> {
        if self.state.borrow().broken.contains(&peer) {
            return Err(TransportError::Closed);
        }
        self.state.borrow_mut().to_peers.push((peer, message.clone()));
        Ok(())
    }

    fn send_to_coordinator(&self, message: &Message) -> Result<(), TransportError> {
        self.state.borrow_mut().to_coordinator.push(message.clone());
        Ok(())
    }

    fn disconnect_peer(&self, peer: ParticipantId) {
        self.state.borrow_mut().disconnected.push(peer);
    }
}

pub struct NullRosterState {
    pub sent: Vec<(ConnectionId, Message)>,
    pub disconnected: Vec<ConnectionId>
}

impl NullRosterState {
    pub fn sent_to(&self, connection: ConnectionId) -> Vec<Message> {
        self.sent.iter().filter(|(c, _)| *c == connection).map(|(_, m)| m.clone()).collect()
    }
}

/// Records everything a CoordinatorCore sends
pub struct NullRosterMessenger {
    state: rc::Rc<RefCell<NullRosterState>>
}

impl NullRosterMessenger {
    pub fn new() -> (rc::Rc<RefCell<NullRosterState>>, rc::Rc<dyn RosterMessenger>) {
        let s = rc::Rc::new( RefCell::new(NullRosterState {
            sent: Vec::new(),
            disconnected: Vec::new()
        }));

        let n = rc::Rc::new( NullRosterMessenger {
            state: s.clone()
        });

        (s, n)
    }
}

impl RosterMessenger for NullRosterMessenger {
    fn send(&self, to: ConnectionId, message: &Message) -> Result<(), TransportError> {
        self.state.borrow_mut().sent.push((to, message.clone()));
        Ok(())
    }

    fn disconnect(&self, connection: ConnectionId) {
        self.state.borrow_mut().disconnected.push(connection);
    }
}
