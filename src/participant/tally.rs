//! Majority computation over a participant's vote set
//!
use std::collections::BTreeMap;

use crate::vote::{Outcome, VoteOption, VoteSet};

#[derive(Debug, PartialEq, Eq)]
pub struct Tally {
    /// Number of votes per option. Options nobody voted for are absent.
    pub counts: BTreeMap<VoteOption, usize>,

    /// Every option that received the highest count, in option order
    pub leaders: Vec<VoteOption>,

    /// Total number of votes counted
    pub total: usize
}

impl Tally {
    pub fn count(votes: &VoteSet) -> Tally {
        let mut counts = BTreeMap::new();
        for option in votes.values() {
            *counts.entry(option.clone()).or_insert(0usize) += 1;
        }

        let max = counts.values().copied().max().unwrap_or(0);
        let leaders = counts.iter()
            .filter(|(_, n)| **n == max)
            .map(|(option, _)| option.clone())
            .collect();

        Tally {
            counts,
            leaders,
            total: votes.len()
        }
    }

    pub fn max_count(&self) -> usize {
        self.leaders.first().and_then(|o| self.counts.get(o)).copied().unwrap_or(0)
    }

    /// True when the leading count is more than half of all votes counted
    pub fn is_majority(&self) -> bool {
        self.max_count() * 2 > self.total
    }

    /// A decisive outcome requires a single leader holding a strict majority.
    /// Anything else is a tie or a plurality and never gets broken here.
    pub fn outcome(&self) -> Outcome {
        if self.leaders.len() == 1 && self.is_majority() {
            Outcome::Decided(self.leaders[0].clone())
        } else {
            Outcome::NoDecision
        }
    }

    /// Options a restarted vote chooses between: the tied leaders, or every
    /// option that received a vote when a lone leader fell short of a majority.
    pub fn restart_pool(&self) -> Vec<VoteOption> {
        if self.leaders.len() > 1 {
            self.leaders.clone()
        } else {
            self.counts.keys().cloned().collect()
        }
    }
}
