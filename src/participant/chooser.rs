use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::vote::VoteOption;

/// Picks a participant's private vote
pub trait VoteChooser {
    /// `options` is never empty
    fn choose(&mut self, options: &[VoteOption]) -> VoteOption;
}

/// Uniformly random choice
pub struct RandomChooser {
    rng: StdRng
}

impl RandomChooser {
    pub fn new() -> RandomChooser {
        RandomChooser { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> RandomChooser {
        RandomChooser { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for RandomChooser {
    fn default() -> RandomChooser {
        RandomChooser::new()
    }
}

impl VoteChooser for RandomChooser {
    fn choose(&mut self, options: &[VoteOption]) -> VoteOption {
        options.choose(&mut self.rng).cloned().unwrap_or_else(|| options[0].clone())
    }
}

/// Plays back a fixed sequence of choices, one per epoch. A scripted choice that
/// is not on offer, or an exhausted script, falls back to the first option.
pub struct ScriptedChooser {
    script: VecDeque<VoteOption>
}

impl ScriptedChooser {
    pub fn new(script: &[&str]) -> ScriptedChooser {
        ScriptedChooser { script: script.iter().map(|s| VoteOption::from(*s)).collect() }
    }
}

impl VoteChooser for ScriptedChooser {
    fn choose(&mut self, options: &[VoteOption]) -> VoteOption {
        match self.script.pop_front() {
            Some(o) if options.contains(&o) => o,
            _ => options[0].clone()
        }
    }
}
