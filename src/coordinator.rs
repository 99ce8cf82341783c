//! Coordinator side of the vote
//!
//! `CoordinatorCore` admits participants, hands out membership and vote options
//! once everybody has joined, then aggregates the outcomes each epoch. All of
//! its state is owned by the single thread that feeds it events.
//!
use std::rc::Rc;

use log::{error, info, warn};

use crate::messages::Message;
use crate::network::{ConnectionId, RosterMessenger};
use crate::vote::{Outcome, ParticipantId, VoteOption};

pub mod roster;
pub mod server;

pub use self::server::Coordinator;

use self::roster::Roster;

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum State {
    AwaitingJoins,
    AwaitingOutcomes,
    /// Every outcome was "no decision". The RESTART broadcast is pending.
    Restarting,
    Decided(VoteOption),
    /// Every participant is gone
    Failed
}

pub struct CoordinatorCore {
    net: Rc<dyn RosterMessenger>,
    roster: Roster,
    options: Vec<VoteOption>,
    expected: usize,
    outcomes: Vec<(ParticipantId, Outcome)>,
    epoch: u32,
    state: State
}

impl CoordinatorCore {
    pub fn new(expected: usize, options: Vec<VoteOption>, net: Rc<dyn RosterMessenger>) -> CoordinatorCore {
        CoordinatorCore {
            net,
            roster: Roster::new(),
            options,
            expected,
            outcomes: Vec::new(),
            epoch: 1,
            state: State::AwaitingJoins
        }
    }

    pub fn state(&self) -> &State { &self.state }

    pub fn expected(&self) -> usize { self.expected }

    pub fn epoch(&self) -> u32 { self.epoch }

    pub fn roster(&self) -> &Roster { &self.roster }

    pub fn joined(&mut self, connection: ConnectionId, id: ParticipantId) {
        if self.roster.is_joined(connection) {
            warn!("Duplicate JOIN {} on {}, ignoring", id, connection);
            return;
        }

        if self.state != State::AwaitingJoins || self.roster.len() >= self.expected {
            warn!("Rejecting surplus participant {} on {}", id, connection);
            self.net.disconnect(connection);
            return;
        }

        if !self.roster.insert(id, connection) {
            warn!("Participant {} already joined, rejecting {}", id, connection);
            self.net.disconnect(connection);
            return;
        }

        info!("Participant {} joined ({} of {})", id, self.roster.len(), self.expected);

        self.check_joins();
    }

    pub fn reported(&mut self, connection: ConnectionId, outcome: Outcome, voters: Vec<ParticipantId>) {
        let member = match self.roster.get(connection) {
            Some(m) => *m,
            None => {
                warn!("OUTCOME from {} which never joined, ignoring", connection);
                return;
            }
        };

        if self.state != State::AwaitingOutcomes {
            warn!("Ignoring outcome {} from {} while {:?}", outcome, member.id, self.state);
            return;
        }

        if member.reported {
            warn!("Participant {} already reported this epoch, ignoring {}", member.id, outcome);
            return;
        }

        info!("Participant {} reports {} from the votes of [{}]", member.id, outcome,
            voters.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "));

        self.roster.mark_reported(member.id);
        self.outcomes.push((member.id, outcome));

        self.check_outcomes();
    }

    pub fn lost(&mut self, connection: ConnectionId) {
        let member = match self.roster.remove(connection) {
            Some(m) => m,
            None => return
        };

        match self.state {
            State::Decided(_) | State::Failed => return,
            _ => ()
        }

        if member.reported {
            warn!("Participant {} disconnected after reporting", member.id);
        } else {
            self.expected = self.expected.saturating_sub(1);
            warn!("Participant {} disconnected, now expecting {} outcome(s)", member.id, self.expected);
        }

        if self.expected == 0 {
            error!("All participants are gone, no consensus is possible");
            self.state = State::Failed;
            return;
        }

        self.check_joins();
        self.check_outcomes();
    }

    /// Broadcasts RESTART to every connected participant and opens a new epoch
    pub fn restart(&mut self) {
        if self.state != State::Restarting {
            return;
        }

        for m in self.roster.members() {
            if let Err(e) = self.net.send(m.connection, &Message::Restart) {
                warn!("Failed to send RESTART to {}: {}", m.id, e);
            }
        }

        self.outcomes.clear();
        self.roster.clear_reported();
        self.expected = self.roster.len();
        self.epoch += 1;

        if self.expected == 0 {
            error!("No participants left to restart, no consensus is possible");
            self.state = State::Failed;
            return;
        }

        info!("Epoch {} begins with {} participant(s)", self.epoch, self.expected);
        self.state = State::AwaitingOutcomes;
    }

    fn check_joins(&mut self) {
        if self.state != State::AwaitingJoins || self.roster.len() < self.expected {
            return;
        }

        let ids = self.roster.ids();
        let options = Message::VoteOptions(self.options.clone());

        for m in self.roster.members() {
            let details = Message::Details(ids.iter().copied().filter(|p| *p != m.id).collect());
            let sent = self.net.send(m.connection, &details).and_then(|_| self.net.send(m.connection, &options));
            if let Err(e) = sent {
                warn!("Failed to send details to {}: {}", m.id, e);
            }
        }

        info!("All {} participants joined, vote options sent", self.expected);
        self.state = State::AwaitingOutcomes;
    }

    fn check_outcomes(&mut self) {
        if self.state != State::AwaitingOutcomes || self.outcomes.is_empty() || self.outcomes.len() < self.expected {
            return;
        }

        let first = &self.outcomes[0].1;

        if !self.outcomes.iter().all(|(_, o)| o == first) {
            warn!("Participants disagree: {}", self.outcomes.iter()
                .map(|(id, o)| format!("{}={}", id, o)).collect::<Vec<_>>().join(" "));
            return;
        }

        match first.clone() {
            Outcome::NoDecision => {
                info!("Unanimous no decision in epoch {}, restarting", self.epoch);
                self.state = State::Restarting;
            },
            Outcome::Decided(option) => {
                info!("Consensus reached on {}", option);
                for m in self.roster.members() {
                    self.net.disconnect(m.connection);
                }
                self.state = State::Decided(option);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use crate::network::null::{NullRosterMessenger, NullRosterState};

    fn opt(s: &str) -> VoteOption { VoteOption::from(s) }

    fn setup(expected: usize) -> (Rc<RefCell<NullRosterState>>, CoordinatorCore) {
        let (state, net) = NullRosterMessenger::new();
        (state, CoordinatorCore::new(expected, vec![opt("A"), opt("B")], net))
    }

    fn join_all(c: &mut CoordinatorCore, n: u16) {
        for i in 0..n {
            c.joined(ConnectionId(i as u64), ParticipantId(100 + i));
        }
    }

    fn decided(o: &str) -> Outcome { Outcome::Decided(opt(o)) }

    #[test]
    fn details_sent_once_everyone_joined() {
        let (state, mut c) = setup(3);
        c.joined(ConnectionId(0), ParticipantId(100));
        c.joined(ConnectionId(1), ParticipantId(101));
        assert!(state.borrow().sent.is_empty());

        c.joined(ConnectionId(2), ParticipantId(102));
        assert_eq!(c.state(), &State::AwaitingOutcomes);
        assert_eq!(state.borrow().sent_to(ConnectionId(1)), vec![
            Message::Details(vec![ParticipantId(100), ParticipantId(102)]),
            Message::VoteOptions(vec![opt("A"), opt("B")])
        ]);
    }

    #[test]
    fn duplicate_and_surplus_joins() {
        let (state, mut c) = setup(2);
        c.joined(ConnectionId(0), ParticipantId(100));
        c.joined(ConnectionId(0), ParticipantId(100));
        c.joined(ConnectionId(1), ParticipantId(100));
        assert_eq!(c.roster().len(), 1);
        assert_eq!(state.borrow().disconnected, vec![ConnectionId(1)]);

        c.joined(ConnectionId(2), ParticipantId(101));
        c.joined(ConnectionId(3), ParticipantId(102));
        assert_eq!(c.roster().len(), 2);
        assert_eq!(state.borrow().disconnected, vec![ConnectionId(1), ConnectionId(3)]);
    }

    #[test]
    fn unanimous_decision_closes_everyone() {
        let (state, mut c) = setup(3);
        join_all(&mut c, 3);
        c.reported(ConnectionId(0), decided("A"), vec![]);
        c.reported(ConnectionId(1), decided("A"), vec![]);
        assert_eq!(c.state(), &State::AwaitingOutcomes);
        c.reported(ConnectionId(2), decided("A"), vec![]);

        assert_eq!(c.state(), &State::Decided(opt("A")));
        assert_eq!(state.borrow().disconnected.len(), 3);
    }

    #[test]
    fn disagreement_keeps_waiting() {
        let (_, mut c) = setup(2);
        join_all(&mut c, 2);
        c.reported(ConnectionId(0), decided("A"), vec![]);
        c.reported(ConnectionId(1), decided("B"), vec![]);
        assert_eq!(c.state(), &State::AwaitingOutcomes);
    }

    #[test]
    fn duplicate_outcome_is_ignored() {
        let (_, mut c) = setup(2);
        join_all(&mut c, 2);
        c.reported(ConnectionId(0), Outcome::NoDecision, vec![]);
        c.reported(ConnectionId(0), Outcome::NoDecision, vec![]);
        assert_eq!(c.state(), &State::AwaitingOutcomes);
    }

    #[test]
    fn unanimous_null_restarts() {
        let (state, mut c) = setup(2);
        join_all(&mut c, 2);
        c.reported(ConnectionId(0), Outcome::NoDecision, vec![ParticipantId(100), ParticipantId(101)]);
        c.reported(ConnectionId(1), Outcome::NoDecision, vec![ParticipantId(100), ParticipantId(101)]);
        assert_eq!(c.state(), &State::Restarting);

        c.restart();
        assert_eq!(c.state(), &State::AwaitingOutcomes);
        assert_eq!(c.epoch(), 2);
        assert_eq!(state.borrow().sent_to(ConnectionId(0)).last(), Some(&Message::Restart));
        assert!(c.roster().members().all(|m| !m.reported));

        c.reported(ConnectionId(0), decided("B"), vec![]);
        c.reported(ConnectionId(1), decided("B"), vec![]);
        assert_eq!(c.state(), &State::Decided(opt("B")));
    }

    #[test]
    fn disconnect_before_reporting_shrinks_expected() {
        let (_, mut c) = setup(3);
        join_all(&mut c, 3);
        c.reported(ConnectionId(0), decided("A"), vec![]);
        c.lost(ConnectionId(2));
        assert_eq!(c.expected(), 2);
        c.reported(ConnectionId(1), decided("A"), vec![]);
        assert_eq!(c.state(), &State::Decided(opt("A")));
    }

    #[test]
    fn disconnect_after_reporting_keeps_expected() {
        let (_, mut c) = setup(3);
        join_all(&mut c, 3);
        c.reported(ConnectionId(0), Outcome::NoDecision, vec![]);
        c.lost(ConnectionId(0));
        assert_eq!(c.expected(), 3);
        c.reported(ConnectionId(1), Outcome::NoDecision, vec![]);
        c.reported(ConnectionId(2), Outcome::NoDecision, vec![]);
        assert_eq!(c.state(), &State::Restarting);

        // Only the two connected participants take part in the next epoch
        c.restart();
        assert_eq!(c.expected(), 2);
    }

    #[test]
    fn losing_everyone_fails() {
        let (_, mut c) = setup(2);
        join_all(&mut c, 2);
        c.lost(ConnectionId(0));
        assert_eq!(c.state(), &State::AwaitingOutcomes);
        c.lost(ConnectionId(1));
        assert_eq!(c.state(), &State::Failed);
    }

    #[test]
    fn disconnect_while_joining_lowers_the_bar() {
        let (state, mut c) = setup(3);
        c.joined(ConnectionId(0), ParticipantId(100));
        c.joined(ConnectionId(1), ParticipantId(101));
        c.lost(ConnectionId(0));
        assert_eq!(c.expected(), 2);
        assert_eq!(c.state(), &State::AwaitingJoins);

        c.joined(ConnectionId(2), ParticipantId(102));
        assert_eq!(c.state(), &State::AwaitingOutcomes);
        assert_eq!(state.borrow().sent_to(ConnectionId(2))[0], Message::Details(vec![ParticipantId(101)]));
    }

    #[test]
    fn unjoined_connection_loss_is_ignored() {
        let (_, mut c) = setup(2);
        c.lost(ConnectionId(7));
        assert_eq!(c.expected(), 2);
        c.reported(ConnectionId(7), decided("A"), vec![]);
        assert_eq!(c.state(), &State::AwaitingJoins);
    }
}
