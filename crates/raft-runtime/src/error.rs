//! # error
//!
//! why: failures a host sees that the synchronous core never produces
//! relations: returned by actor.rs handles and cluster.rs
//! what: RuntimeError

use raft_core::{NodeId, RaftError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Raft(#[from] RaftError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node {0} is not running")]
    NodeStopped(NodeId),

    /// The node lost leadership before the request committed.
    #[error("request to node {0} was dropped before it committed")]
    RequestDropped(NodeId),

    #[error("no node with id {0}")]
    UnknownNode(NodeId),

    #[error("no leader after {0} ms")]
    NoLeader(u64),
}
