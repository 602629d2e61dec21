//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: election.rs, replication.rs, client.rs and membership.rs add the
//!            protocol handlers; persist.rs, transport.rs and state_machine.rs
//!            are the collaborators it is built on
//! what: NodeState, RaftNode (startup/recovery, clock and timers, durability
//!       gating, rpc dispatch, step down, termination), NodeStatus

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace};

use crate::config::{RaftConfig, Verbosity};
use crate::error::RaftError;
use crate::log::Log;
use crate::membership::Membership;
use crate::message::{ClientResponse, MembershipResponse, RaftMessage};
use crate::persist::{PersistentState, Storage};
use crate::state_machine::StateMachine;
use crate::timer::{random_election_timeout, Timer};
use crate::transport::Transport;
use crate::{LogIndex, NodeId, Term};

/// The possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
    /// Removed from the cluster or shut down; ignores everything
    Terminated,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "follower"),
            NodeState::Candidate => write!(f, "candidate"),
            NodeState::Leader => write!(f, "leader"),
            NodeState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A reply continuation waiting for its log index to commit.
pub(crate) enum Pending {
    Client(oneshot::Sender<ClientResponse>),
    Membership(oneshot::Sender<MembershipResponse>),
}

/// Point-in-time view of a node, for hosts and the cli.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    /// entries including the sentinel
    pub log_length: usize,
    pub members: Vec<NodeId>,
}

/// A single Raft node in the cluster
///
/// All state is owned here and mutated from one thread of control: hosts
/// call [`tick`](Self::tick) with a monotonic millisecond clock, hand
/// inbound rpcs to [`receive`](Self::receive), and submit client work via
/// [`client_request`](Self::client_request), [`add_server`](Self::add_server)
/// and [`remove_server`](Self::remove_server).
pub struct RaftNode<T, S, M> {
    pub(crate) id: NodeId,
    pub(crate) config: RaftConfig,
    pub(crate) transport: T,
    pub(crate) storage: S,
    pub(crate) state_machine: M,
    pub(crate) rng: StdRng,
    pub(crate) now: u64,

    // durable
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) log: Log,
    pub(crate) dirty: bool,

    // volatile, all servers
    pub(crate) state: NodeState,
    pub(crate) commit_index: LogIndex,
    pub(crate) last_applied: LogIndex,
    pub(crate) leader_id: Option<NodeId>,
    pub(crate) members: Membership,
    pub(crate) removal_committed: bool,

    // candidates
    pub(crate) votes_granted: BTreeSet<NodeId>,

    // leaders
    pub(crate) next_index: BTreeMap<NodeId, LogIndex>,
    pub(crate) match_index: BTreeMap<NodeId, LogIndex>,
    /// removed servers still to confirm they saw their removal commit,
    /// keyed to the index of the removing entry
    pub(crate) departing: BTreeMap<NodeId, LogIndex>,
    pub(crate) pending_config_change: Option<LogIndex>,
    pub(crate) pending: BTreeMap<LogIndex, Pending>,

    pub(crate) election_timer: Timer,
    pub(crate) heartbeat_timer: Timer,
}

impl<T, S, M> RaftNode<T, S, M>
where
    T: Transport,
    S: Storage,
    M: StateMachine,
{
    /// Start a node at clock time `now`.
    ///
    /// Durable state found in `storage` is adopted and the node waits as a
    /// follower. With nothing stored, a bootstrap node makes itself leader
    /// of a fresh cluster; any other node stays idle, with no election
    /// timer, until a leader contacts it.
    pub fn open(
        id: NodeId,
        config: RaftConfig,
        transport: T,
        mut storage: S,
        state_machine: M,
        now: u64,
    ) -> Result<Self, RaftError> {
        config.validate()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ id),
            None => StdRng::from_entropy(),
        };
        let loaded = storage.load()?;

        let mut node = Self {
            id,
            config,
            transport,
            storage,
            state_machine,
            rng,
            now,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            dirty: false,
            state: NodeState::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            members: Membership::default(),
            removal_committed: false,
            votes_granted: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            departing: BTreeMap::new(),
            pending_config_change: None,
            pending: BTreeMap::new(),
            election_timer: Timer::Disarmed,
            heartbeat_timer: Timer::Disarmed,
        };

        match loaded {
            Some(persisted) => {
                node.current_term = persisted.current_term;
                node.voted_for = persisted.voted_for;
                node.log = Log::from_entries(persisted.log);
                node.observe_membership();
                info!(
                    node_id = id,
                    term = node.current_term,
                    log_length = node.log.len(),
                    "recovered durable state"
                );
                node.reset_election_timer();
            }
            None if node.config.is_bootstrap_node => {
                node.observe_membership();
                info!(node_id = id, "bootstrapping new cluster");
                node.current_term = 1;
                node.voted_for = Some(id);
                node.dirty = true;
                node.become_leader();
            }
            None => {
                node.observe_membership();
                info!(node_id = id, "no durable state, waiting for a leader");
            }
        }

        Ok(node)
    }

    // -- introspection --

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn members(&self) -> &Membership {
        &self.members
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn next_index(&self, peer: NodeId) -> Option<LogIndex> {
        self.next_index.get(&peer).copied()
    }

    pub fn match_index(&self, peer: NodeId) -> Option<LogIndex> {
        self.match_index.get(&peer).copied()
    }

    /// Whether a membership change is appended but not yet committed.
    pub fn config_change_pending(&self) -> bool {
        self.pending_config_change.is_some()
    }

    pub fn election_deadline(&self) -> Option<u64> {
        self.election_timer.deadline()
    }

    pub fn heartbeat_deadline(&self) -> Option<u64> {
        self.heartbeat_timer.deadline()
    }

    pub fn state_machine(&self) -> &M {
        &self.state_machine
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            state: self.state,
            current_term: self.current_term,
            voted_for: self.voted_for,
            leader_id: self.leader_hint(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            log_length: self.log.len(),
            members: self.members.to_vec(),
        }
    }

    /// Best guess at the current leader, for redirecting clients.
    pub fn leader_hint(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Leader => Some(self.id),
            NodeState::Terminated => None,
            _ => self.leader_id,
        }
    }

    // -- driving the node --

    /// Advance the clock and fire whichever timers are due.
    pub fn tick(&mut self, now: u64) {
        self.now = self.now.max(now);
        if self.state == NodeState::Terminated {
            return;
        }
        if self.election_timer.fire(self.now) {
            self.start_election();
        }
        if self.heartbeat_timer.fire(self.now) {
            self.leader_heartbeat();
        }
        self.finish_removal();
    }

    /// Handle one inbound rpc; requests are answered through the transport.
    pub fn receive(&mut self, message: RaftMessage) {
        if self.state == NodeState::Terminated {
            trace!(node_id = self.id, kind = message.kind(), "terminated, dropping rpc");
            return;
        }
        if self.verbose() {
            debug!(
                node_id = self.id,
                term = self.current_term,
                kind = message.kind(),
                from = message.source(),
                "received rpc"
            );
        }

        match message {
            RaftMessage::RequestVote(args) => {
                let candidate = args.candidate_id;
                let response = self.handle_request_vote(args);
                self.send(candidate, RaftMessage::RequestVoteResponse(response));
            }
            RaftMessage::RequestVoteResponse(response) => {
                self.handle_request_vote_response(response);
            }
            RaftMessage::AppendEntries(args) => {
                let leader = args.leader_id;
                let response = self.handle_append_entries(args);
                self.send(leader, RaftMessage::AppendEntriesResponse(response));
            }
            RaftMessage::AppendEntriesResponse(response) => {
                self.handle_append_entries_response(response);
            }
        }

        self.finish_removal();
    }

    /// Shut the node down; every later call is ignored or rejected.
    pub fn terminate(&mut self) {
        if self.state == NodeState::Terminated {
            return;
        }
        self.flush();
        info!(node_id = self.id, term = self.current_term, "terminated");
        self.state = NodeState::Terminated;
        self.election_timer.disarm();
        self.heartbeat_timer.disarm();
        self.leader_id = None;
        self.votes_granted.clear();
        self.next_index.clear();
        self.match_index.clear();
        self.departing.clear();
        self.pending_config_change = None;
        self.pending.clear();
    }

    // -- internals shared by the handlers --

    pub(crate) fn verbose(&self) -> bool {
        self.config.verbosity >= Verbosity::Verbose
    }

    pub(crate) fn send(&mut self, target: NodeId, message: RaftMessage) {
        if self.verbose() {
            debug!(node_id = self.id, to = target, kind = message.kind(), "sending rpc");
        }
        self.transport.send(target, message);
    }

    /// Write term, vote and log through the storage hook if they changed.
    ///
    /// A failed save is logged and the caller carries on.
    pub(crate) fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let state = PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.entries().to_vec(),
        };
        if let Err(e) = self.storage.save(&state) {
            error!(node_id = self.id, term = self.current_term, error = %e, "failed to persist state");
        }
    }

    /// Adopt a newer term; the vote belongs to the old term.
    pub(crate) fn update_term(&mut self, term: Term) {
        if term <= self.current_term {
            return;
        }
        self.current_term = term;
        self.voted_for = None;
        self.votes_granted.clear();
        self.dirty = true;
    }

    pub(crate) fn reset_election_timer(&mut self) {
        let timeout = random_election_timeout(&mut self.rng, self.config.election_timeout_base_ms);
        self.election_timer.arm(self.now + timeout);
    }

    /// Become a follower. No-op for followers and terminated nodes.
    pub(crate) fn step_down(&mut self) {
        if matches!(self.state, NodeState::Follower | NodeState::Terminated) {
            return;
        }
        info!(node_id = self.id, term = self.current_term, from = %self.state, "follower");
        let was_leader = self.state == NodeState::Leader;
        self.state = NodeState::Follower;
        self.votes_granted.clear();
        self.heartbeat_timer.disarm();
        if !self.election_timer.is_armed() {
            self.reset_election_timer();
        }
        if was_leader {
            // waiting clients must retry elsewhere
            self.leader_id = None;
            self.pending.clear();
            self.pending_config_change = None;
            self.next_index.clear();
            self.match_index.clear();
            self.departing.clear();
        }
    }

    /// Observe a term in an rpc or response; step down if it is newer.
    pub(crate) fn observe_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            self.update_term(term);
            self.step_down();
            self.leader_id = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish_removal(&mut self) {
        if self.removal_committed && self.state != NodeState::Terminated {
            self.terminate();
        }
    }
}
