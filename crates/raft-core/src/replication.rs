//! # replication
//!
//! why: copy the leader's log to followers and decide when entries are committed
//! relations: heartbeat timer in node.rs drives leader_heartbeat; membership.rs
//!            decides who is replicated to; committed entries go to the StateMachine
//! what: heartbeat round, appendEntries handlers, commit index advance, apply loop

use std::cmp::{max, min};
use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::membership::majority_index;
use crate::message::{
    AppendEntriesArgs, AppendEntriesResponse, ClientResponse, MembershipResponse,
    MembershipStatus, RaftMessage,
};
use crate::node::{NodeState, Pending, RaftNode};
use crate::persist::Storage;
use crate::state_machine::StateMachine;
use crate::transport::Transport;
use crate::{LogIndex, NodeId};

impl<T, S, M> RaftNode<T, S, M>
where
    T: Transport,
    S: Storage,
    M: StateMachine,
{
    /// One replication round to every peer, then re-arm the heartbeat.
    pub(crate) fn leader_heartbeat(&mut self) {
        if self.state != NodeState::Leader {
            return;
        }
        self.flush();

        let peers: Vec<NodeId> = self.next_index.keys().copied().collect();
        for peer in peers {
            self.send_append_entries(peer);
        }

        // a lone member commits on its own
        self.advance_commit_index();

        if self.state == NodeState::Leader {
            self.heartbeat_timer
                .arm(self.now + self.config.heartbeat_interval_ms);
        }
    }

    pub(crate) fn send_append_entries(&mut self, peer: NodeId) {
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(self.log.len() as LogIndex);
        let prev_log_index = next.saturating_sub(1);
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or_else(|| {
            panic!(
                "next_index {next} for peer {peer} is past the log tail {}",
                self.log.last_index()
            )
        });

        let args = AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            entries: self.log.entries_from(prev_log_index + 1),
            leader_commit_index: self.commit_index,
            trailing_log_length: self.log.last_index(),
        };
        self.send(peer, RaftMessage::AppendEntries(args));
    }

    /// Receiver side of log replication. The returned response is safe to
    /// send: any state it depends on has been flushed.
    pub fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> AppendEntriesResponse {
        self.observe_term(args.term);

        if args.term < self.current_term {
            self.flush();
            return self.append_entries_response(&args, false);
        }

        // a legitimate leader for our term
        self.step_down();
        self.leader_id = Some(args.leader_id);
        self.reset_election_timer();

        if !self.log.matches(args.prev_log_index, args.prev_log_term) {
            if self.verbose() {
                debug!(
                    node_id = self.id,
                    term = self.current_term,
                    prev_log_index = args.prev_log_index,
                    prev_log_term = args.prev_log_term,
                    last_log_index = self.log.last_index(),
                    "log mismatch"
                );
            }
            self.flush();
            return self.append_entries_response(&args, false);
        }

        if let Some(first_changed) = self.log.merge_from(args.prev_log_index, &args.entries) {
            assert!(
                first_changed > self.commit_index,
                "leader {} overwrote committed index {first_changed} on node {}",
                args.leader_id,
                self.id
            );
            self.dirty = true;
            self.observe_membership();
        }

        let last_new_index = args.prev_log_index + args.entries.len() as LogIndex;
        let new_commit = min(args.leader_commit_index, last_new_index);
        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed();
        }

        self.flush();
        self.append_entries_response(&args, true)
    }

    fn append_entries_response(&self, args: &AppendEntriesArgs, success: bool) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.current_term,
            success,
            source_id: self.id,
            trailing_log_length: args.trailing_log_length,
            commit_index: self.commit_index,
            last_log_index: self.log.last_index(),
        }
    }

    pub fn handle_append_entries_response(&mut self, response: AppendEntriesResponse) {
        if self.observe_term(response.term) {
            return;
        }
        if self.state != NodeState::Leader || response.term != self.current_term {
            return;
        }
        let peer = response.source_id;
        let Some(next) = self.next_index.get(&peer).copied() else {
            return;
        };

        if response.success {
            let matched = self.match_index.entry(peer).or_insert(0);
            *matched = max(*matched, response.trailing_log_length);
            let matched = *matched;
            self.next_index.insert(peer, matched + 1);
            if self.departing.get(&peer).is_some_and(|index| *index <= response.commit_index) {
                info!(node_id = self.id, peer_id = peer, "removed server saw its removal");
                self.departing.remove(&peer);
                self.next_index.remove(&peer);
                self.match_index.remove(&peer);
                return;
            }
            self.advance_commit_index();
        } else {
            let backed_off = min(next.saturating_sub(1), response.last_log_index + 1).max(1);
            if self.verbose() {
                debug!(node_id = self.id, peer_id = peer, next_index = backed_off, "backing off");
            }
            self.next_index.insert(peer, backed_off);
        }
    }

    /// Commit the highest index held by a majority of members, provided the
    /// entry there belongs to the current term.
    pub(crate) fn advance_commit_index(&mut self) {
        if self.state != NodeState::Leader {
            return;
        }
        let mut indexes: Vec<LogIndex> = self
            .members
            .iter()
            .map(|id| {
                if id == self.id {
                    self.log.last_index()
                } else {
                    self.match_index.get(&id).copied().unwrap_or(0)
                }
            })
            .collect();
        let candidate = majority_index(&mut indexes);

        if candidate > self.commit_index && self.log.term_at(candidate) == Some(self.current_term) {
            debug!(node_id = self.id, term = self.current_term, index = candidate, "commit index advanced");
            self.commit_index = candidate;
            self.apply_committed();
        }
    }

    /// Apply every committed but unapplied entry in order and answer whoever
    /// is waiting on it.
    pub(crate) fn apply_committed(&mut self) {
        // callbacks below must not run ahead of durable state
        self.flush();

        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let index = self.last_applied;
            let entry = self
                .log
                .get(index)
                .cloned()
                .unwrap_or_else(|| panic!("committed index {index} is past the log tail"));

            let outcome = entry.command.as_ref().map(|command| {
                let result = self.state_machine.apply(command);
                if let Err(e) = &result {
                    warn!(node_id = self.id, index, error = %e, "command failed to apply");
                }
                result
            });
            if let Some(change) = &entry.membership {
                self.commit_membership(index, change);
            }

            match self.pending.remove(&index) {
                Some(Pending::Client(responder)) => {
                    let response = match outcome {
                        Some(Ok(result)) => ClientResponse::success(result),
                        Some(Err(message)) => ClientResponse::error(message),
                        None => ClientResponse::success(Value::Null),
                    };
                    let _ = responder.send(response);
                }
                Some(Pending::Membership(responder)) => {
                    let _ = responder.send(MembershipResponse::new(
                        MembershipStatus::Ok,
                        self.leader_hint(),
                    ));
                }
                None => {}
            }
        }
    }

    /// Keep next/match entries for exactly the servers being replicated to:
    /// every other member, a server whose removal has not committed, and
    /// removed servers that have not yet seen the commit.
    pub(crate) fn sync_replication_peers(&mut self) {
        if self.state != NodeState::Leader {
            return;
        }
        let members = &self.members;
        self.departing.retain(|id, _| !members.contains(*id));

        let mut targets: BTreeSet<NodeId> = self.members.iter().collect();
        targets.extend(self.leaving_server());
        targets.extend(self.departing.keys().copied());
        targets.remove(&self.id);

        let next = self.log.len() as LogIndex;
        for peer in &targets {
            self.next_index.entry(*peer).or_insert(next);
            self.match_index.entry(*peer).or_insert(0);
        }
        self.next_index.retain(|id, _| targets.contains(id));
        self.match_index.retain(|id, _| targets.contains(id));
    }
}
