//! Identifiers and values exchanged during a vote
//!
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Wire token used in place of an option when a participant could not decide
pub const NO_DECISION: &str = "null";

/// Identifies a participant. This is the port the participant listens on for
/// connections from its peers.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Hash)]
pub struct ParticipantId(pub u16);

impl ParticipantId {
    pub fn port(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<ParticipantId, Self::Err> {
        s.parse::<u16>().map(ParticipantId)
    }
}

/// One of the ballot choices handed out by the coordinator
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct VoteOption(String);

impl VoteOption {
    pub fn new<S: Into<String>>(s: S) -> VoteOption {
        VoteOption(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Options travel as single space separated tokens and must never collide
    /// with the no-decision marker.
    pub fn is_valid_token(s: &str) -> bool {
        !s.is_empty() && s != NO_DECISION && !s.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for VoteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VoteOption {
    fn from(s: &str) -> VoteOption {
        VoteOption(s.to_string())
    }
}

/// A participant's accumulated knowledge of who voted for what during the
/// current epoch. Ordered so that gossip and tallies are deterministic.
pub type VoteSet = BTreeMap<ParticipantId, VoteOption>;

/// Result of a participant's local decision
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Outcome {
    Decided(VoteOption),
    NoDecision
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Decided(option) => write!(f, "{}", option),
            Outcome::NoDecision => write!(f, "{}", NO_DECISION)
        }
    }
}

/// Simulated crash behaviour of a participant
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum FailureMode {
    /// Run normally
    None,
    /// Crash right after the first vote of round 1 has been sent
    DuringBroadcast,
    /// Crash at the moment a decision could be reported
    AfterDecision
}

impl Default for FailureMode {
    fn default() -> FailureMode {
        FailureMode::None
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::None => write!(f, "none"),
            FailureMode::DuringBroadcast => write!(f, "during-broadcast"),
            FailureMode::AfterDecision => write!(f, "after-decision")
        }
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<FailureMode, String> {
        match s {
            "0" | "none" => Ok(FailureMode::None),
            "1" | "during-broadcast" => Ok(FailureMode::DuringBroadcast),
            "2" | "after-decision" => Ok(FailureMode::AfterDecision),
            other => Err(format!("unknown failure condition '{}'", other))
        }
    }
}

/// Config files may give the failure condition as its code, bare or quoted,
/// or by name
#[derive(Deserialize)]
#[serde(untagged)]
enum FailureModeToken {
    Code(u64),
    Name(String)
}

impl<'de> Deserialize<'de> for FailureMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<FailureMode, D::Error> {
        let token = match FailureModeToken::deserialize(deserializer)? {
            FailureModeToken::Code(code) => code.to_string(),
            FailureModeToken::Name(name) => name
        };
        token.parse().map_err(de::Error::custom)
    }
}
