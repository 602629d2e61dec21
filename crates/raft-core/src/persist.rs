//! # persist
//!
//! why: term, vote and log must survive a crash before any reply depends on them
//! relations: node.rs flushes through Storage; raft-storage provides the file backend
//! what: PersistentState record, Storage trait, MemoryStorage for tests and simulations

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::log::LogEntry;
use crate::{NodeId, Term};

/// The durable part of a node's state, written as one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
}

/// trait for durable storage of raft state
///
/// `save` returns once the record is durable; `load` returns `Ok(None)`
/// when nothing has ever been saved.
pub trait Storage {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError>;

    fn load(&mut self) -> Result<Option<PersistentState>, StorageError>;
}

/// in-memory storage for testing
///
/// Clones share one slot, so a handle kept by a test outlives a "crashed"
/// node and can be passed to its replacement.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<PersistentState>>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last record saved, if any.
    pub fn snapshot(&self) -> Option<PersistentState> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    /// Make every following `save` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.fail_saves.lock() {
            *flag = failing;
        }
    }
}

impl Storage for MemoryStorage {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        let failing = self.fail_saves.lock().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(StorageError::Unavailable("memory storage set to fail".into()));
        }
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        *slot = Some(state.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<PersistentState>, StorageError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        Ok(slot.clone())
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        (**self).save(state)
    }

    fn load(&mut self) -> Result<Option<PersistentState>, StorageError> {
        (**self).load()
    }
}
