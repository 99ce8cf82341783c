//! Process configuration
//!
//! Both processes accept their settings either as positional command line
//! arguments or from a TOML file with the same field names. Either way the
//! result must pass `validate()` before it is used.
//!
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::vote::{FailureMode, VoteOption, NO_DECISION};

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_restart_delay_ms() -> u64 { 2000 }

fn default_connect_timeout_ms() -> u64 { 30_000 }

fn default_settle_delay_ms() -> u64 { 500 }

fn default_first_round_ms() -> u64 { 100 }

fn default_round_interval_ms() -> u64 { 500 }

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    /// Number of participants expected to join
    pub participants: usize,

    pub options: Vec<String>,

    /// Pause between a unanimous "no decision" and the RESTART broadcast
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64
}

impl CoordinatorConfig {
    pub fn new(port: u16, participants: usize, options: &[&str]) -> CoordinatorConfig {
        CoordinatorConfig {
            host: default_host(),
            port,
            participants,
            options: options.iter().map(|s| s.to_string()).collect(),
            restart_delay_ms: default_restart_delay_ms()
        }
    }

    /// `<port> <participants> <option>...`
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<CoordinatorConfig, ConfigError> {
        if args.len() < 3 {
            return Err(ConfigError::InsufficientArguments(
                "expected <port> <participants> <option>...".to_string()));
        }

        let mut config = CoordinatorConfig {
            host: default_host(),
            port: parse("port", args[0].as_ref())?,
            participants: parse("participants", args[1].as_ref())?,
            options: args[2..].iter().map(|s| s.as_ref().to_string()).collect(),
            restart_delay_ms: default_restart_delay_ms()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
        let mut config: CoordinatorConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Removes duplicate options, keeping the first occurrence of each
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.participants == 0 {
            return Err(invalid("participants", "at least one participant is required"));
        }

        let mut unique: Vec<String> = Vec::with_capacity(self.options.len());
        for option in self.options.drain(..) {
            if option == NO_DECISION {
                return Err(invalid("options", "'null' is reserved"));
            }
            if !VoteOption::is_valid_token(&option) {
                return Err(invalid("options", &format!("'{}' is not a single token", option)));
            }
            if !unique.contains(&option) {
                unique.push(option);
            }
        }
        self.options = unique;

        if self.options.len() < 2 {
            return Err(invalid("options", "at least two distinct options are required"));
        }

        Ok(())
    }

    pub fn vote_options(&self) -> Vec<VoteOption> {
        self.options.iter().map(|s| VoteOption::new(s.as_str())).collect()
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantConfig {
    #[serde(default = "default_host")]
    pub host: String,

    pub coordinator_port: u16,

    /// Our listen port, which is also our identity
    pub port: u16,

    /// Peer link read timeout
    pub timeout_ms: u64,

    #[serde(default)]
    pub failure_mode: FailureMode,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_first_round_ms")]
    pub first_round_ms: u64,

    #[serde(default = "default_round_interval_ms")]
    pub round_interval_ms: u64
}

impl ParticipantConfig {
    pub fn new(coordinator_port: u16, port: u16, timeout_ms: u64, failure_mode: FailureMode) -> ParticipantConfig {
        ParticipantConfig {
            host: default_host(),
            coordinator_port,
            port,
            timeout_ms,
            failure_mode,
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            first_round_ms: default_first_round_ms(),
            round_interval_ms: default_round_interval_ms()
        }
    }

    /// `<coordinator port> <port> <timeout ms> <failure condition>`
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<ParticipantConfig, ConfigError> {
        if args.len() < 4 {
            return Err(ConfigError::InsufficientArguments(
                "expected <coordinator port> <port> <timeout> <failure condition>".to_string()));
        }
        if args.len() > 4 {
            return Err(invalid("arguments", "unexpected trailing arguments"));
        }

        let failure_mode = FailureMode::from_str(args[3].as_ref())
            .map_err(|reason| ConfigError::InvalidValue { field: "failure condition", reason })?;

        let config = ParticipantConfig::new(
            parse("coordinator port", args[0].as_ref())?,
            parse("port", args[1].as_ref())?,
            parse("timeout", args[2].as_ref())?,
            failure_mode);

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<ParticipantConfig, ConfigError> {
        let config: ParticipantConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(invalid("timeout", "must be greater than zero"));
        }
        if self.port == self.coordinator_port {
            return Err(invalid("port", "must differ from the coordinator port"));
        }
        if self.round_interval_ms == 0 || self.first_round_ms == 0 {
            return Err(invalid("round interval", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }

    pub fn settle_delay(&self) -> Duration { Duration::from_millis(self.settle_delay_ms) }

    pub fn first_round(&self) -> Duration { Duration::from_millis(self.first_round_ms) }

    pub fn round_interval(&self) -> Duration { Duration::from_millis(self.round_interval_ms) }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.to_string() }
}

fn parse<T>(field: &'static str, s: &str) -> Result<T, ConfigError>
    where T: FromStr, T::Err: std::fmt::Display
{
    s.parse::<T>().map_err(|e| ConfigError::InvalidValue { field, reason: format!("'{}': {}", s, e) })
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(e: ConfigError) -> &'static str {
        match e {
            ConfigError::InvalidValue { field, .. } => field,
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn coordinator_positional() {
        let c = CoordinatorConfig::from_args(&["12345", "3", "A", "B", "A"]).unwrap();
        assert_eq!(c.port, 12345);
        assert_eq!(c.participants, 3);
        assert_eq!(c.options, vec!["A", "B"]);
        assert_eq!(c.restart_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn coordinator_rejects_bad_input() {
        assert!(matches!(CoordinatorConfig::from_args(&["12345", "3"]),
            Err(ConfigError::InsufficientArguments(_))));
        assert_eq!(field_of(CoordinatorConfig::from_args(&["x", "3", "A", "B"]).unwrap_err()), "port");
        assert_eq!(field_of(CoordinatorConfig::from_args(&["1", "0", "A", "B"]).unwrap_err()), "participants");
        assert_eq!(field_of(CoordinatorConfig::from_args(&["1", "2", "A", "null"]).unwrap_err()), "options");
        assert_eq!(field_of(CoordinatorConfig::from_args(&["1", "2", "A", "A"]).unwrap_err()), "options");
    }

    #[test]
    fn participant_positional() {
        let p = ParticipantConfig::from_args(&["12345", "12346", "5000", "1"]).unwrap();
        assert_eq!(p.coordinator_port, 12345);
        assert_eq!(p.port, 12346);
        assert_eq!(p.timeout(), Duration::from_millis(5000));
        assert_eq!(p.failure_mode, FailureMode::DuringBroadcast);
        assert_eq!(p.settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn participant_rejects_bad_input() {
        assert!(matches!(ParticipantConfig::from_args(&["12345", "12346", "5000"]),
            Err(ConfigError::InsufficientArguments(_))));
        assert_eq!(field_of(ParticipantConfig::from_args(&["1", "2", "0", "0"]).unwrap_err()), "timeout");
        assert_eq!(field_of(ParticipantConfig::from_args(&["1", "1", "10", "0"]).unwrap_err()), "port");
        assert_eq!(field_of(ParticipantConfig::from_args(&["1", "2", "10", "7"]).unwrap_err()),
            "failure condition");
    }
}
