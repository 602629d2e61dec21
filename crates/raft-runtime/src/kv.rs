//! # kv
//!
//! why: something concrete to replicate in the demo cluster and runtime tests
//! relations: StateMachine behind every node spawned by cluster.rs
//! what: KvCommand, KvStore

use std::collections::BTreeMap;

use raft_core::StateMachine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands understood by [`KvStore`], e.g. `{"op": "set", "key": "a", "value": 1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum KvCommand {
    Set { key: String, value: Value },
    Get { key: String },
    Delete { key: String },
}

impl KvCommand {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Value {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
        .to_value()
    }

    pub fn get(key: impl Into<String>) -> Value {
        Self::Get { key: key.into() }.to_value()
    }

    pub fn delete(key: impl Into<String>) -> Value {
        Self::Delete { key: key.into() }.to_value()
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn parse(command: &Value) -> Result<Self, String> {
        serde_json::from_value(command.clone()).map_err(|e| format!("bad kv command: {e}"))
    }
}

/// In-memory key/value map.
#[derive(Debug, Clone, Default)]
pub struct KvStore {
    entries: BTreeMap<String, Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateMachine for KvStore {
    /// `set` returns the new value, `delete` the removed one (or null).
    fn apply(&mut self, command: &Value) -> Result<Value, String> {
        match KvCommand::parse(command)? {
            KvCommand::Set { key, value } => {
                self.entries.insert(key, value.clone());
                Ok(value)
            }
            KvCommand::Get { key } => Ok(self.entries.get(&key).cloned().unwrap_or(Value::Null)),
            KvCommand::Delete { key } => Ok(self.entries.remove(&key).unwrap_or(Value::Null)),
        }
    }

    fn query(&self, command: &Value) -> Result<Value, String> {
        match KvCommand::parse(command)? {
            KvCommand::Get { key } => Ok(self.entries.get(&key).cloned().unwrap_or(Value::Null)),
            other => Err(format!("{other:?} is not read-only")),
        }
    }
}
