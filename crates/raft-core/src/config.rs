//! # config
//!
//! why: one place for the tunables every node in a cluster must agree on
//! relations: consumed by node.rs (timers, bootstrap), loaded by raft-runtime's cli
//! what: RaftConfig, Verbosity, json loading and validation

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RaftError;
use crate::NodeId;

/// How much the node logs about its own protocol traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Only warnings and errors
    Quiet,
    /// Role transitions and membership changes
    #[default]
    Normal,
    /// Every rpc sent and received
    Verbose,
}

impl std::str::FromStr for Verbosity {
    type Err = RaftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" => Ok(Self::Quiet),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            other => Err(RaftError::InvalidConfig(format!("unknown verbosity '{other}'"))),
        }
    }
}

/// Configuration of a single raft node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// lower bound of the randomized election timeout; the upper bound is twice this
    pub election_timeout_base_ms: u64,
    /// interval between leader heartbeat rounds, must be well below the election timeout
    pub heartbeat_interval_ms: u64,
    /// on empty durable state, become leader of a fresh cluster instead of waiting
    pub is_bootstrap_node: bool,
    /// membership before any membership entry is observed; empty means just this node
    pub initial_members: Vec<NodeId>,
    pub verbosity: Verbosity,
    /// fixed seed for the election timeout rng (tests); `None` seeds from entropy
    pub rng_seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_base_ms: 150,
            heartbeat_interval_ms: 30,
            is_bootstrap_node: false,
            initial_members: Vec::new(),
            verbosity: Verbosity::Normal,
            rng_seed: None,
        }
    }
}

impl RaftConfig {
    /// Build a config whose heartbeat is a fifth of the election timeout base.
    pub fn with_election_timeout(base_ms: u64) -> Self {
        Self {
            election_timeout_base_ms: base_ms,
            heartbeat_interval_ms: base_ms / 5,
            ..Default::default()
        }
    }

    /// Load a config from a json file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RaftError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| RaftError::InvalidConfig(format!("{}: {e}", path.as_ref().display())))?;
        let config: RaftConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_base_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "election_timeout_base_ms must be positive".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.heartbeat_interval_ms >= self.election_timeout_base_ms {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be shorter than election_timeout_base_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_base_ms
            )));
        }
        Ok(())
    }
}
