use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::messages::DecodeError;
use crate::vote::{FailureMode, ParticipantId};

/// Problems with the startup configuration. These are always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("insufficient arguments: {0}")]
    InsufficientArguments(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("participant {0} shares its port with another participant")]
    DuplicatePort(ParticipantId),

    #[error("failed to read config file {path:?}")]
    Read { path: PathBuf, #[source] source: io::Error },

    #[error("failed to parse config file {path:?}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error }
}

/// Socket level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to listen on {addr}")]
    Bind { addr: SocketAddr, #[source] source: io::Error },

    #[error("could not connect to {addr} before the deadline")]
    ConnectTimeout { addr: SocketAddr, #[source] source: io::Error },

    #[error("connection closed by the remote end")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),

    #[error("expected {expected} but received '{received}'")]
    UnexpectedMessage { expected: &'static str, received: String },

    #[error("only {established} of {expected} peer links were established before the deadline")]
    MeshTimeout { established: usize, expected: usize },

    #[error("lost the connection to the coordinator")]
    CoordinatorLost,

    #[error("simulated failure ({0})")]
    SimulatedFailure(FailureMode),

    #[error("more than one peer failed during the same epoch")]
    CascadingFailure,

    #[error("every participant failed; no consensus is possible")]
    NoConsensusPossible
}

pub type Result<T> = std::result::Result<T, Error>;
