//! Outbound messaging interfaces used by the voting cores
//!
//! The cores never touch sockets directly. They are handed a messenger through
//! which all outbound traffic flows, which lets the tests drive them with the
//! recording implementations in `null`.
//!
use std::fmt;

use crate::error::TransportError;
use crate::messages::Message;
use crate::vote::ParticipantId;

pub mod link;
pub mod null;

/// Identifies a connection accepted by the coordinator. Participants are only
/// known by their ParticipantId once they have sent JOIN.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.0)
    }
}

/// A participant's view of its peer links and its coordinator link
pub trait MeshMessenger {
    fn send_to_peer(&self, peer: ParticipantId, message: &Message) -> Result<(), TransportError>;

    fn send_to_coordinator(&self, message: &Message) -> Result<(), TransportError>;

    /// Closes the link to the peer. The link's reader reports the closure but
    /// the core has already written the peer off.
    fn disconnect_peer(&self, peer: ParticipantId);
}

/// The coordinator's view of its participant connections
pub trait RosterMessenger {
    fn send(&self, to: ConnectionId, message: &Message) -> Result<(), TransportError>;

    fn disconnect(&self, connection: ConnectionId);
}
