//! # raft-runtime
//!
//! why: raft-core is synchronous and clock-free; something has to own the
//!      nodes, feed them time and carry their messages
//! relations: hosts raft-core nodes, persists through raft-storage
//! what: per-node tokio actor, in-process network, demo kv state machine,
//!       local cluster driver used by the raft-local binary

pub mod actor;
pub mod cluster;
pub mod error;
pub mod kv;
pub mod network;

pub use actor::{spawn_node, Command, NodeHandle, TICK_INTERVAL_MS};
pub use cluster::LocalCluster;
pub use error::RuntimeError;
pub use kv::{KvCommand, KvStore};
pub use network::{LocalNetwork, LocalTransport};
