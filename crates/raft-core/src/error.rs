//! # error
//!
//! why: give fallible operations a typed error instead of strings
//! relations: returned by config loading, node startup and storage backends
//! what: RaftError, StorageError

use thiserror::Error;

use crate::NodeId;

/// Errors a storage backend can report from `save`/`load`.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt persisted state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("node {0} has been terminated")]
    Terminated(NodeId),
}
