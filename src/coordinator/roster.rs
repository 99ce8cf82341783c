use std::collections::{BTreeMap, HashMap};

use crate::network::ConnectionId;
use crate::vote::ParticipantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: ParticipantId,
    pub connection: ConnectionId,
    /// Outcome received during the current epoch
    pub reported: bool
}

/// Joined participants, addressable both by ParticipantId and by the
/// connection they joined on
#[derive(Default)]
pub struct Roster {
    members: BTreeMap<ParticipantId, Member>,
    by_connection: HashMap<ConnectionId, ParticipantId>
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    pub fn len(&self) -> usize { self.members.len() }

    pub fn is_joined(&self, connection: ConnectionId) -> bool {
        self.by_connection.contains_key(&connection)
    }

    /// Returns false if either the id or the connection is already registered
    pub fn insert(&mut self, id: ParticipantId, connection: ConnectionId) -> bool {
        if self.members.contains_key(&id) || self.by_connection.contains_key(&connection) {
            return false;
        }
        self.members.insert(id, Member { id, connection, reported: false });
        self.by_connection.insert(connection, id);
        true
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&Member> {
        self.by_connection.get(&connection).and_then(|id| self.members.get(id))
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<Member> {
        let id = self.by_connection.remove(&connection)?;
        self.members.remove(&id)
    }

    pub fn mark_reported(&mut self, id: ParticipantId) {
        if let Some(m) = self.members.get_mut(&id) {
            m.reported = true;
        }
    }

    pub fn clear_reported(&mut self) {
        for m in self.members.values_mut() {
            m.reported = false;
        }
    }

    /// Members in ParticipantId order
    pub fn members(&self) -> impl Iterator<Item=&Member> {
        self.members.values()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.members.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_connection() {
        let mut r = Roster::new();
        assert!(r.insert(ParticipantId(20), ConnectionId(0)));
        assert!(r.insert(ParticipantId(10), ConnectionId(1)));
        assert!(!r.insert(ParticipantId(10), ConnectionId(2)));
        assert!(!r.insert(ParticipantId(30), ConnectionId(0)));

        assert_eq!(r.get(ConnectionId(1)).map(|m| m.id), Some(ParticipantId(10)));
        assert_eq!(r.ids(), vec![ParticipantId(10), ParticipantId(20)]);

        r.mark_reported(ParticipantId(10));
        assert!(r.get(ConnectionId(1)).map(|m| m.reported).unwrap_or(false));
        r.clear_reported();
        assert!(r.members().all(|m| !m.reported));

        assert_eq!(r.remove(ConnectionId(0)).map(|m| m.id), Some(ParticipantId(20)));
        assert!(r.remove(ConnectionId(0)).is_none());
        assert_eq!(r.len(), 1);
    }
}
