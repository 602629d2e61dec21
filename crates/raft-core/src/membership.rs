//! # membership
//!
//! why: cluster membership changes one server at a time and takes effect as
//!      soon as a node sees the change in its log, not when it commits
//! relations: derived from log.rs entries; quorum math used by election.rs and
//!            replication.rs; add/remove handlers live on RaftNode
//! what: Membership set, quorum arithmetic, add_server / remove_server

use std::collections::BTreeSet;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::info;

use crate::log::{Log, LogEntry, MembershipChange, ServerChange};
use crate::message::{MembershipResponse, MembershipStatus};
use crate::node::{NodeState, Pending, RaftNode};
use crate::persist::Storage;
use crate::state_machine::StateMachine;
use crate::transport::Transport;
use crate::{LogIndex, NodeId};

/// The set of servers whose votes and acknowledgements count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Membership {
    servers: BTreeSet<NodeId>,
}

impl Membership {
    pub fn new(servers: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            servers: servers.into_iter().collect(),
        }
    }

    /// Membership as seen by `self_id`: the newest membership entry in the
    /// log wins, otherwise the configured initial members.
    ///
    /// With no initial members only a bootstrap node counts itself; anyone
    /// else has no members, and so never campaigns, until a membership
    /// entry reaches it.
    pub fn derive(initial: &[NodeId], self_id: NodeId, bootstrap: bool, log: &Log) -> Self {
        match log.last_membership() {
            Some((_, change)) => Self::new(change.new_servers()),
            None if !initial.is_empty() => Self::new(initial.iter().copied()),
            None if bootstrap => Self::new([self_id]),
            None => Self::default(),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.servers.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.servers.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        self.iter().collect()
    }

    /// Every member except `self_id`.
    pub fn peers(&self, self_id: NodeId) -> Vec<NodeId> {
        self.iter().filter(|id| *id != self_id).collect()
    }

    /// Strict majority: `floor(N/2) + 1`.
    pub fn quorum_size(&self) -> usize {
        self.servers.len() / 2 + 1
    }
}

/// Highest index present on a majority of the given per-server indexes.
///
/// After an ascending sort, every value at or past position `N - quorum`
/// is held by at least `quorum` servers.
pub fn majority_index(indexes: &mut [LogIndex]) -> LogIndex {
    if indexes.is_empty() {
        return 0;
    }
    indexes.sort_unstable();
    let quorum = indexes.len() / 2 + 1;
    indexes[indexes.len() - quorum]
}

impl<T, S, M> RaftNode<T, S, M>
where
    T: Transport,
    S: Storage,
    M: StateMachine,
{
    /// Ask the leader to add `new_server` to the cluster.
    pub fn add_server(&mut self, new_server: NodeId, responder: oneshot::Sender<MembershipResponse>) {
        self.change_membership(ServerChange::Add(new_server), responder);
    }

    /// Ask the leader to remove `old_server` from the cluster.
    pub fn remove_server(&mut self, old_server: NodeId, responder: oneshot::Sender<MembershipResponse>) {
        self.change_membership(ServerChange::Remove(old_server), responder);
    }

    fn change_membership(
        &mut self,
        change: ServerChange,
        responder: oneshot::Sender<MembershipResponse>,
    ) {
        if let Err(status) = self.check_membership_change(change) {
            let _ = responder.send(MembershipResponse::new(status, self.leader_hint()));
            return;
        }

        let entry = LogEntry::membership(
            self.current_term,
            MembershipChange {
                old_servers: self.members.to_vec(),
                change,
            },
        );
        let index = self.log.append(entry);
        self.dirty = true;
        self.pending_config_change = Some(index);
        self.pending.insert(index, Pending::Membership(responder));
        info!(node_id = self.id, term = self.current_term, index, ?change, "membership change appended");

        self.observe_membership();
        self.leader_heartbeat();
    }

    /// Preconditions, in order; each failure has its own status.
    fn check_membership_change(&self, change: ServerChange) -> Result<(), MembershipStatus> {
        if self.state != NodeState::Leader {
            return Err(MembershipStatus::NotLeader);
        }
        if self.pending_config_change.is_some() {
            return Err(MembershipStatus::PendingConfigChange);
        }
        match change {
            ServerChange::Add(id) if self.members.contains(id) => Err(MembershipStatus::AlreadyAMember),
            ServerChange::Remove(id) if !self.members.contains(id) => Err(MembershipStatus::NotAMember),
            _ => Ok(()),
        }
    }

    /// Recompute membership from the log after it changed.
    pub(crate) fn observe_membership(&mut self) {
        let members = Membership::derive(
            &self.config.initial_members,
            self.id,
            self.config.is_bootstrap_node,
            &self.log,
        );
        if members != self.members {
            info!(node_id = self.id, members = ?members.to_vec(), "membership changed");
            self.members = members;
        }
        self.sync_replication_peers();
    }

    /// Server removed by the newest membership entry once that entry has
    /// committed, with the entry's index.
    pub(crate) fn removed_server(&self) -> Option<(NodeId, LogIndex)> {
        match self.log.last_membership() {
            Some((index, change)) if index <= self.commit_index => match change.change {
                ServerChange::Remove(id) if id != self.id => Some((id, index)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Server being removed by a membership entry that has not committed yet.
    pub(crate) fn leaving_server(&self) -> Option<NodeId> {
        match self.log.last_membership() {
            Some((index, change)) if index > self.commit_index => match change.change {
                ServerChange::Remove(id) => Some(id),
                ServerChange::Add(_) => None,
            },
            _ => None,
        }
    }

    /// Side effects of a membership entry reaching the commit index.
    pub(crate) fn commit_membership(&mut self, index: LogIndex, change: &MembershipChange) {
        if self.pending_config_change.is_some_and(|pending| pending <= index) {
            self.pending_config_change = None;
        }
        match change.change {
            ServerChange::Remove(id) if id == self.id => {
                info!(node_id = self.id, index, "own removal committed");
                self.removal_committed = true;
            }
            ServerChange::Remove(id) if self.state == NodeState::Leader => {
                // keep replicating until it reports this commit
                if self.next_index.contains_key(&id) {
                    self.departing.insert(id, index);
                    self.send_append_entries(id);
                }
            }
            _ => {}
        }
    }
}
