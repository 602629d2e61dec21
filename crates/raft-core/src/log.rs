//! # log
//!
//! why: manage the append-only log of commands that raft replicates
//! relations: owned by node.rs, persisted whole via persist.rs, replayed by membership.rs
//! what: LogEntry, MembershipChange, the sentinel-headed Log container and its
//!       consistency checks (log matching, up-to-date comparison, conflict truncation)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{LogIndex, NodeId, Term};

/// Which single server a membership entry adds or removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerChange {
    Add(NodeId),
    Remove(NodeId),
}

/// A single-server configuration change carried by a log entry.
///
/// `old_servers` is the membership the leader had when it appended the
/// entry, so a node replaying the log can rebuild membership from the
/// latest membership entry alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub old_servers: Vec<NodeId>,
    pub change: ServerChange,
}

impl MembershipChange {
    /// Membership after this change is applied, sorted and deduplicated.
    pub fn new_servers(&self) -> Vec<NodeId> {
        let mut servers = self.old_servers.clone();
        match self.change {
            ServerChange::Add(id) => servers.push(id),
            ServerChange::Remove(id) => servers.retain(|s| *s != id),
        }
        servers.sort_unstable();
        servers.dedup();
        servers
    }

    pub fn removes(&self, id: NodeId) -> bool {
        self.change == ServerChange::Remove(id)
    }
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// The command to be applied to the state machine; `None` for no-ops
    pub command: Option<Value>,
    /// Configuration change carried by this entry, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<MembershipChange>,
}

impl LogEntry {
    /// Create a new log entry carrying a client command
    pub fn new(term: Term, command: Value) -> Self {
        Self {
            term,
            command: Some(command),
            membership: None,
        }
    }

    /// The entry every log starts with at index 0.
    pub fn sentinel() -> Self {
        Self::noop(0)
    }

    /// An entry with no command, e.g. the marker a new leader appends.
    pub fn noop(term: Term) -> Self {
        Self {
            term,
            command: None,
            membership: None,
        }
    }

    pub fn membership(term: Term, change: MembershipChange) -> Self {
        Self {
            term,
            command: None,
            membership: Some(change),
        }
    }
}

/// The replicated log. Index 0 always holds the sentinel, so the log is
/// never empty and `entries[i]` is the entry at log index `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

impl Log {
    pub fn new() -> Self {
        Self {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Rebuild a log from persisted entries, restoring the sentinel if the
    /// record was written without one.
    pub fn from_entries(mut entries: Vec<LogEntry>) -> Self {
        match entries.first() {
            Some(first) if first.term == 0 => {}
            _ => entries.insert(0, LogEntry::sentinel()),
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the sentinel is never removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> LogIndex {
        (self.entries.len() - 1) as LogIndex
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    /// Whether this log holds an entry at `index` with term `term`.
    pub fn matches(&self, index: LogIndex, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Entries from `start` (inclusive) to the tail.
    pub fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        let start = (start as usize).min(self.entries.len());
        self.entries[start..].to_vec()
    }

    /// Append one entry at the tail, returning its index.
    pub fn append(&mut self, entry: LogEntry) -> LogIndex {
        self.entries.push(entry);
        self.last_index()
    }

    /// Drop every entry after `index`. Returns how many were removed.
    pub fn truncate_after(&mut self, index: LogIndex) -> usize {
        let keep = (index as usize + 1).max(1);
        let removed = self.entries.len().saturating_sub(keep);
        self.entries.truncate(keep);
        removed
    }

    /// Merge entries that follow `prev_index` into the log.
    ///
    /// Existing entries are only truncated from the first index whose term
    /// conflicts with an incoming entry; entries already present are left
    /// alone, so replaying the same request is a no-op. Returns the index
    /// of the first entry that changed, or `None` if the log is unchanged.
    ///
    /// The caller must already have checked `matches(prev_index, ..)`.
    pub fn merge_from(&mut self, prev_index: LogIndex, entries: &[LogEntry]) -> Option<LogIndex> {
        let mut first_change = None;
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_index + 1 + offset as LogIndex;
            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.truncate_after(index - 1);
                    self.entries.push(entry.clone());
                }
                None => self.entries.push(entry.clone()),
            }
            first_change.get_or_insert(index);
        }
        first_change
    }

    /// Raft §5.4.1: is a candidate log ending at (`last_index`, `last_term`)
    /// at least as up-to-date as this one?
    pub fn is_up_to_date(&self, last_index: LogIndex, last_term: Term) -> bool {
        let our_term = self.last_term();
        last_term > our_term || (last_term == our_term && last_index >= self.last_index())
    }

    /// Index and change of the newest membership entry, if any.
    pub fn last_membership(&self) -> Option<(LogIndex, &MembershipChange)> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, e)| e.membership.as_ref().map(|m| (i as LogIndex, m)))
    }
}
