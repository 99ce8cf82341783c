//! Leader coordinated majority voting over a full participant mesh
//!
//! A coordinator admits a fixed number of participants and hands them the
//! membership and the vote options. The participants gossip their votes
//! directly with each other, decide locally and report back. A unanimous
//! "no decision" makes the coordinator restart the vote among the tied options.
//!
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod messages;
pub mod network;
pub mod participant;
pub mod vote;

pub use error::{Error, Result};
