//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-runtime (tokio actor), persisted via raft-storage
//! what: node state machine, election logic, log replication, membership changes,
//!       durability gating, and the collaborator traits the node is built on

pub mod config;
pub mod error;
pub mod log;
pub mod membership;
pub mod message;
pub mod node;
pub mod persist;
pub mod state_machine;
pub mod timer;
pub mod transport;

mod client;
mod election;
mod replication;

pub use config::{RaftConfig, Verbosity};
pub use error::{RaftError, StorageError};
pub use log::{Log, LogEntry, MembershipChange, ServerChange};
pub use membership::Membership;
pub use message::{
    AppendEntriesArgs, AppendEntriesResponse, ClientResponse, ClientStatus, MembershipResponse,
    MembershipStatus, RaftMessage, RequestVoteArgs, RequestVoteResponse,
};
pub use node::{NodeState, NodeStatus, RaftNode};
pub use persist::{MemoryStorage, PersistentState, Storage};
pub use state_machine::{FnStateMachine, StateMachine};
pub use transport::Transport;

/// Identifier of a cluster member.
pub type NodeId = u64;

/// Position in the replicated log; index 0 is the sentinel.
pub type LogIndex = u64;

/// Leadership term number.
pub type Term = u64;
