//! Line oriented wire protocol shared by the coordinator and the participants
//!
//! Every message is a single line of space separated tokens. The first token
//! names the command; the remainder are its arguments.
//!
use std::fmt;

use thiserror::Error;

use crate::vote::{Outcome, ParticipantId, VoteOption, NO_DECISION};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{command} is missing an argument")]
    MissingArgument { command: &'static str },

    #[error("{command} has unexpected trailing arguments")]
    TrailingArguments { command: &'static str },

    #[error("'{0}' is not a valid participant id")]
    InvalidParticipantId(String),

    #[error("VOTE carries an odd number of tokens")]
    UnpairedVote,

    #[error("'{0}' is not a valid vote option")]
    InvalidOption(String)
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Message {
    /// Identifies the sender. Sent by a participant to the coordinator and, as
    /// the first line of a peer link, to the accepting participant.
    Join(ParticipantId),

    /// Every other member of the vote
    Details(Vec<ParticipantId>),

    VoteOptions(Vec<VoteOption>),

    /// One pair during round 1, the sender's full vote set afterwards
    Vote(Vec<(ParticipantId, VoteOption)>),

    Outcome {
        outcome: Outcome,
        voters: Vec<ParticipantId>
    },

    Restart
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Join(_) => "JOIN",
            Message::Details(_) => "DETAILS",
            Message::VoteOptions(_) => "VOTE_OPTIONS",
            Message::Vote(_) => "VOTE",
            Message::Outcome { .. } => "OUTCOME",
            Message::Restart => "RESTART"
        }
    }

    pub fn decode(line: &str) -> Result<Message, DecodeError> {
        let mut tokens = line.split_whitespace();

        let command = tokens.next().ok_or(DecodeError::Empty)?;

        match command {
            "JOIN" => {
                let id = tokens.next().ok_or(DecodeError::MissingArgument { command: "JOIN" })?;
                let id = parse_id(id)?;
                if tokens.next().is_some() {
                    return Err(DecodeError::TrailingArguments { command: "JOIN" });
                }
                Ok(Message::Join(id))
            },
            "DETAILS" => {
                let ids = tokens.map(parse_id).collect::<Result<Vec<_>, _>>()?;
                Ok(Message::Details(ids))
            },
            "VOTE_OPTIONS" => {
                let options = tokens.map(parse_option).collect::<Result<Vec<_>, _>>()?;
                Ok(Message::VoteOptions(options))
            },
            "VOTE" => {
                let tokens: Vec<&str> = tokens.collect();
                if tokens.is_empty() {
                    return Err(DecodeError::MissingArgument { command: "VOTE" });
                }
                if tokens.len() % 2 != 0 {
                    return Err(DecodeError::UnpairedVote);
                }
                let mut votes = Vec::with_capacity(tokens.len() / 2);
                for pair in tokens.chunks(2) {
                    votes.push((parse_id(pair[0])?, parse_option(pair[1])?));
                }
                Ok(Message::Vote(votes))
            },
            "OUTCOME" => {
                let outcome = tokens.next().ok_or(DecodeError::MissingArgument { command: "OUTCOME" })?;
                let outcome = if outcome == NO_DECISION {
                    Outcome::NoDecision
                } else {
                    Outcome::Decided(parse_option(outcome)?)
                };

                // Voter lists are also accepted in their bracketed "[1, 2]" form
                let mut voters = Vec::new();
                for token in tokens {
                    for id in token.split(|c: char| c == '[' || c == ']' || c == ',') {
                        if !id.is_empty() {
                            voters.push(parse_id(id)?);
                        }
                    }
                }
                Ok(Message::Outcome { outcome, voters })
            },
            "RESTART" => {
                if tokens.next().is_some() {
                    return Err(DecodeError::TrailingArguments { command: "RESTART" });
                }
                Ok(Message::Restart)
            },
            other => Err(DecodeError::UnknownCommand(other.to_string()))
        }
    }

    /// Flattens a vote set into a single VOTE message
    pub fn votes<'a, I>(votes: I) -> Message
        where I: IntoIterator<Item=(&'a ParticipantId, &'a VoteOption)>
    {
        Message::Vote(votes.into_iter().map(|(id, option)| (*id, option.clone())).collect())
    }
}

fn parse_id(token: &str) -> Result<ParticipantId, DecodeError> {
    token.parse::<ParticipantId>().map_err(|_| DecodeError::InvalidParticipantId(token.to_string()))
}

fn parse_option(token: &str) -> Result<VoteOption, DecodeError> {
    if VoteOption::is_valid_token(token) {
        Ok(VoteOption::new(token))
    } else {
        Err(DecodeError::InvalidOption(token.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command())?;
        match self {
            Message::Join(id) => write!(f, " {}", id),
            Message::Details(ids) => {
                for id in ids {
                    write!(f, " {}", id)?;
                }
                Ok(())
            },
            Message::VoteOptions(options) => {
                for option in options {
                    write!(f, " {}", option)?;
                }
                Ok(())
            },
            Message::Vote(votes) => {
                for (id, option) in votes {
                    write!(f, " {} {}", id, option)?;
                }
                Ok(())
            },
            Message::Outcome { outcome, voters } => {
                write!(f, " {}", outcome)?;
                for id in voters {
                    write!(f, " {}", id)?;
                }
                Ok(())
            },
            Message::Restart => Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(s: &str) -> VoteOption {
        VoteOption::from(s)
    }

    #[test]
    fn decode_join() {
        assert_eq!(Message::decode("JOIN 12345"), Ok(Message::Join(ParticipantId(12345))));
        assert_eq!(Message::decode("JOIN"), Err(DecodeError::MissingArgument { command: "JOIN" }));
        assert_eq!(Message::decode("JOIN abc"),
            Err(DecodeError::InvalidParticipantId("abc".to_string())));
        assert_eq!(Message::decode("JOIN 1 2"), Err(DecodeError::TrailingArguments { command: "JOIN" }));
    }

    #[test]
    fn decode_tolerates_trailing_space() {
        // Senders may leave a trailing space after the last argument
        assert_eq!(Message::decode("DETAILS 12346 12347 "),
            Ok(Message::Details(vec![ParticipantId(12346), ParticipantId(12347)])));
        assert_eq!(Message::decode("VOTE_OPTIONS A B "),
            Ok(Message::VoteOptions(vec![opt("A"), opt("B")])));
    }

    #[test]
    fn decode_empty_details() {
        assert_eq!(Message::decode("DETAILS"), Ok(Message::Details(vec![])));
    }

    #[test]
    fn decode_single_vote() {
        assert_eq!(Message::decode("VOTE 12345 A"),
            Ok(Message::Vote(vec![(ParticipantId(12345), opt("A"))])));
    }

    #[test]
    fn decode_flattened_votes() {
        assert_eq!(Message::decode("VOTE 1 A 2 B 3 A"),
            Ok(Message::Vote(vec![
                (ParticipantId(1), opt("A")),
                (ParticipantId(2), opt("B")),
                (ParticipantId(3), opt("A"))])));
    }

    #[test]
    fn decode_bad_votes() {
        assert_eq!(Message::decode("VOTE"), Err(DecodeError::MissingArgument { command: "VOTE" }));
        assert_eq!(Message::decode("VOTE 1 A 2"), Err(DecodeError::UnpairedVote));
        assert_eq!(Message::decode("VOTE 1 null"), Err(DecodeError::InvalidOption("null".to_string())));
    }

    #[test]
    fn decode_outcomes() {
        assert_eq!(Message::decode("OUTCOME A 1 2 3"), Ok(Message::Outcome {
            outcome: Outcome::Decided(opt("A")),
            voters: vec![ParticipantId(1), ParticipantId(2), ParticipantId(3)]
        }));
        assert_eq!(Message::decode("OUTCOME null [1, 2]"), Ok(Message::Outcome {
            outcome: Outcome::NoDecision,
            voters: vec![ParticipantId(1), ParticipantId(2)]
        }));
        assert_eq!(Message::decode("OUTCOME"), Err(DecodeError::MissingArgument { command: "OUTCOME" }));
    }

    #[test]
    fn decode_unknown() {
        assert_eq!(Message::decode("HELLO there"), Err(DecodeError::UnknownCommand("HELLO".to_string())));
        assert_eq!(Message::decode("   "), Err(DecodeError::Empty));
        assert_eq!(Message::decode("RESTART now"), Err(DecodeError::TrailingArguments { command: "RESTART" }));
    }

    #[test]
    fn encode() {
        assert_eq!(Message::Join(ParticipantId(7)).to_string(), "JOIN 7");
        assert_eq!(Message::Details(vec![]).to_string(), "DETAILS");
        assert_eq!(Message::Restart.to_string(), "RESTART");
        assert_eq!(Message::Outcome {
            outcome: Outcome::NoDecision,
            voters: vec![ParticipantId(1), ParticipantId(2)]
        }.to_string(), "OUTCOME null 1 2");
    }

    #[test]
    fn vote_set_flattening_is_ordered() {
        let mut votes = crate::vote::VoteSet::new();
        votes.insert(ParticipantId(3), opt("B"));
        votes.insert(ParticipantId(1), opt("A"));
        let line = Message::votes(&votes).to_string();
        assert_eq!(line, "VOTE 1 A 3 B");
        assert_eq!(Message::decode(&line), Ok(Message::votes(&votes)));
    }
}
