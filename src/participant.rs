//! Participant side of the vote
//!
//! `ParticipantCore` is the per-participant consensus state machine. It is
//! driven by a single thread and sees the network only through a
//! `MeshMessenger`. Every event handler ends by re-evaluating the decision so
//! the order in which votes, timeouts and failures arrive does not matter.
//!
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{ConfigError, Error};
use crate::messages::Message;
use crate::network::MeshMessenger;
use crate::vote::{FailureMode, Outcome, ParticipantId, VoteOption, VoteSet};

pub mod chooser;
pub mod mesh;
pub mod node;
pub mod tally;

pub use self::node::Participant;

use self::chooser::VoteChooser;
use self::tally::Tally;

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Phase {
    Voting,
    /// Reported "no decision" and waiting for the coordinator to restart the vote
    AwaitingRestart,
    /// Reported a decisive outcome. Nothing left to do but wait for the
    /// coordinator to hang up.
    Decided(VoteOption),
    /// Crashed on purpose
    SimulatedFailure(FailureMode),
    /// A second peer failed within the same epoch
    CascadingFailure
}

impl Phase {
    pub fn is_failed(&self) -> bool {
        match self {
            Phase::SimulatedFailure(_) | Phase::CascadingFailure => true,
            _ => false
        }
    }

    /// The error a participant in this phase exits with
    pub fn failure(&self) -> Option<Error> {
        match self {
            Phase::SimulatedFailure(mode) => Some(Error::SimulatedFailure(*mode)),
            Phase::CascadingFailure => Some(Error::CascadingFailure),
            _ => None
        }
    }
}

/// Checks the DETAILS membership against our own id. A peer listening on our
/// own port means two participants were configured with the same port.
pub fn validate_peers(own: ParticipantId, peers: &[ParticipantId]) -> Result<BTreeSet<ParticipantId>, ConfigError> {
    let mut set = BTreeSet::new();
    for peer in peers {
        if *peer == own || !set.insert(*peer) {
            return Err(ConfigError::DuplicatePort(*peer));
        }
    }
    Ok(set)
}

pub struct ParticipantCore {
    id: ParticipantId,
    net: Rc<dyn MeshMessenger>,
    chooser: Box<dyn VoteChooser + Send>,
    timeout: Duration,
    failure_mode: FailureMode,

    /// Every other member of the vote, as announced in DETAILS
    peers: BTreeSet<ParticipantId>,
    /// Peers whose links are still up
    live: BTreeSet<ParticipantId>,
    options: Vec<VoteOption>,
    chosen: VoteOption,

    votes: VoteSet,
    round: u32,
    /// Peers no longer counted toward the quorum threshold
    excluded: BTreeSet<ParticipantId>,
    missing_since: HashMap<ParticipantId, Instant>,
    revoting: bool,
    shared: bool,
    outcome_sent: bool,
    losses: usize,
    restart_pool: Vec<VoteOption>,
    phase: Phase
}

impl ParticipantCore {
    pub fn new(
        id: ParticipantId,
        peers: BTreeSet<ParticipantId>,
        options: Vec<VoteOption>,
        chosen: VoteOption,
        chooser: Box<dyn VoteChooser + Send>,
        timeout: Duration,
        failure_mode: FailureMode,
        net: Rc<dyn MeshMessenger>) -> ParticipantCore {

        let mut votes = VoteSet::new();
        votes.insert(id, chosen.clone());

        ParticipantCore {
            id,
            net,
            chooser,
            timeout,
            failure_mode,
            live: peers.clone(),
            peers,
            options,
            chosen,
            votes,
            round: 1,
            excluded: BTreeSet::new(),
            missing_since: HashMap::new(),
            revoting: false,
            shared: false,
            outcome_sent: false,
            losses: 0,
            restart_pool: Vec::new(),
            phase: Phase::Voting
        }
    }

    pub fn id(&self) -> ParticipantId { self.id }

    pub fn phase(&self) -> &Phase { &self.phase }

    pub fn is_voting(&self) -> bool { self.phase == Phase::Voting }

    pub fn round(&self) -> u32 { self.round }

    pub fn votes(&self) -> &VoteSet { &self.votes }

    pub fn chosen(&self) -> &VoteOption { &self.chosen }

    pub fn live_peers(&self) -> &BTreeSet<ParticipantId> { &self.live }

    pub fn restart_pool(&self) -> &[VoteOption] { &self.restart_pool }

    /// Number of votes that must be known before a decision may be taken
    pub fn votes_required(&self) -> usize {
        self.peers.len() + 1 - self.excluded.len()
    }

    /// Opens round 1 of the current epoch
    pub fn start(&mut self) {
        info!("Round 1 begins, voting {}", self.chosen);
        self.broadcast();
    }

    /// Called when the current round's interval elapses
    pub fn tick(&mut self, now: Instant) {
        self.establish_winner(now);

        if self.is_voting() {
            self.round += 1;
            debug!("Round {} begins with {} of {} required votes", self.round, self.votes.len(),
                self.votes_required());
            self.broadcast();
        }
    }

    pub fn receive_votes(&mut self, from: ParticipantId, pairs: Vec<(ParticipantId, VoteOption)>, now: Instant) {
        if !self.is_voting() {
            debug!("Dropping {} vote(s) from {} received outside of voting", pairs.len(), from);
            return;
        }

        debug!("Received {} vote(s) from {} in round {}", pairs.len(), from, self.round);

        let count = pairs.len();

        for (voter, option) in pairs {
            self.merge(from, voter, option);
        }

        if self.round > 1 && count < self.votes_required() {
            warn!("Incomplete vote set ({} of {}) from {}, revoting", count, self.votes_required(), from);
            self.revoting = true;
        }

        self.establish_winner(now);
    }

    /// The peer's link hit its read timeout
    pub fn peer_silent(&mut self, peer: ParticipantId, now: Instant) {
        if self.outcome_sent || self.phase.is_failed() {
            debug!("Ignoring idle link to {}", peer);
            return;
        }
        warn!("No traffic from {} within {:?}", peer, self.timeout);
        self.net.disconnect_peer(peer);
        self.peer_lost(peer, now);
    }

    /// The peer's link is gone
    pub fn peer_lost(&mut self, peer: ParticipantId, now: Instant) {
        if !self.live.remove(&peer) {
            return;
        }

        if self.outcome_sent || self.phase.is_failed() {
            debug!("Link to {} closed", peer);
            return;
        }

        self.losses += 1;

        if self.losses > 1 {
            error!("Lost {}, the second peer failure this epoch. Giving up", peer);
            self.phase = Phase::CascadingFailure;
            return;
        }

        warn!("Lost the link to {}", peer);

        if self.votes.len() < self.votes_required() {
            warn!("Peer failure with {} of {} votes known, revoting", self.votes.len(), self.votes_required());
            self.revoting = true;
        }

        self.establish_winner(now);
    }

    /// Begins a new epoch after the coordinator's RESTART
    pub fn restart(&mut self) {
        if self.phase != Phase::AwaitingRestart {
            warn!("Ignoring RESTART received while {:?}", self.phase);
            return;
        }

        let pool = if self.restart_pool.is_empty() {
            self.options.clone()
        } else {
            self.restart_pool.clone()
        };

        self.chosen = self.chooser.choose(&pool);
        self.votes.clear();
        self.votes.insert(self.id, self.chosen.clone());
        self.missing_since.clear();
        self.excluded = self.peers.difference(&self.live).copied().collect();
        self.round = 1;
        self.revoting = false;
        self.shared = false;
        self.outcome_sent = false;
        self.losses = 0;
        self.phase = Phase::Voting;

        info!("Restarting the vote among {} live peer(s), choosing from [{}]", self.live.len(),
            join(&pool));

        self.start();
    }

    fn merge(&mut self, from: ParticipantId, voter: ParticipantId, option: VoteOption) {
        if voter != self.id && !self.peers.contains(&voter) {
            warn!("Ignoring vote for unknown participant {} from {}", voter, from);
            return;
        }
        if !self.options.contains(&option) {
            warn!("Ignoring vote for unknown option {} from {}", option, from);
            return;
        }
        match self.votes.get(&voter) {
            None => {
                self.missing_since.remove(&voter);
                self.votes.insert(voter, option);
            },
            Some(known) if *known != option => {
                warn!("{} reports {} voted {} but {} is already known", from, voter, option, known);
            },
            Some(_) => ()
        }
    }

    fn broadcast(&mut self) {
        let message = if self.round == 1 {
            Message::Vote(vec![(self.id, self.chosen.clone())])
        } else {
            Message::votes(&self.votes)
        };

        let targets: Vec<ParticipantId> = self.live.iter().copied().collect();

        for peer in targets {
            debug!("Sending {} to {}", message, peer);
            if let Err(e) = self.net.send_to_peer(peer, &message) {
                warn!("Failed to send to {}: {}", peer, e);
            }
            if self.round == 1 && self.failure_mode == FailureMode::DuringBroadcast {
                error!("Simulating failure during the round 1 broadcast");
                self.phase = Phase::SimulatedFailure(FailureMode::DuringBroadcast);
                return;
            }
        }

        if self.round > 1 {
            self.revoting = false;
        }
        self.shared = true;
    }

    /// Decides if the known votes allow it. Safe to call at any time.
    fn establish_winner(&mut self, now: Instant) {
        if !self.is_voting() {
            return;
        }

        if self.round > 1 && self.votes.len() < self.votes_required() {
            let grace = self.timeout.mul_f64(0.75);
            let missing: Vec<ParticipantId> = self.peers.iter()
                .filter(|p| !self.excluded.contains(p) && !self.votes.contains_key(p))
                .copied()
                .collect();

            for peer in missing {
                let since = *self.missing_since.entry(peer).or_insert(now);
                if now.duration_since(since) > grace {
                    warn!("Vote from {} missing for more than {:?}, no longer waiting for it", peer, grace);
                    self.excluded.insert(peer);
                    self.missing_since.remove(&peer);
                }
            }

            self.revoting = true;
        }

        let quorum = self.votes.len() >= self.votes_required()
            && !self.revoting
            && self.shared
            && self.round > 1;

        if self.outcome_sent || !(quorum || self.live.is_empty()) {
            return;
        }

        if self.failure_mode == FailureMode::AfterDecision {
            error!("Simulating failure at the moment of decision");
            self.phase = Phase::SimulatedFailure(FailureMode::AfterDecision);
            return;
        }

        let tally = Tally::count(&self.votes);
        let outcome = tally.outcome();
        let voters: Vec<ParticipantId> = self.votes.keys().copied().collect();

        if let Err(e) = self.net.send_to_coordinator(&Message::Outcome { outcome: outcome.clone(), voters }) {
            error!("Failed to report the outcome: {}", e);
        }
        self.outcome_sent = true;

        match outcome {
            Outcome::Decided(option) => {
                info!("Decided {} in round {} with {} vote(s)", option, self.round, self.votes.len());
                self.phase = Phase::Decided(option);
            },
            Outcome::NoDecision => {
                self.restart_pool = tally.restart_pool();
                info!("No majority in round {} with {} vote(s), candidates [{}]", self.round,
                    self.votes.len(), join(&self.restart_pool));
                self.phase = Phase::AwaitingRestart;
            }
        }
    }
}

fn join(options: &[VoteOption]) -> String {
    options.iter().map(|o| o.as_str()).collect::<Vec<_>>().join(", ")
}
