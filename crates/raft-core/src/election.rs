//! # election
//!
//! why: pick at most one leader per term
//! relations: timers in node.rs start elections; replication.rs takes over once leader
//! what: start_election, requestVote handlers, become_leader

use tracing::{debug, info};

use crate::log::LogEntry;
use crate::message::{RaftMessage, RequestVoteArgs, RequestVoteResponse};
use crate::node::{NodeState, RaftNode};
use crate::persist::Storage;
use crate::state_machine::StateMachine;
use crate::transport::Transport;

impl<T, S, M> RaftNode<T, S, M>
where
    T: Transport,
    S: Storage,
    M: StateMachine,
{
    /// Election timer fired without hearing from a leader.
    pub(crate) fn start_election(&mut self) {
        if !self.members.contains(self.id) {
            debug!(node_id = self.id, "not a member, not campaigning");
            self.reset_election_timer();
            return;
        }

        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.dirty = true;
        self.state = NodeState::Candidate;
        self.leader_id = None;
        self.votes_granted.clear();
        self.votes_granted.insert(self.id);
        self.reset_election_timer();
        info!(node_id = self.id, term = self.current_term, "starting election");

        // the vote for ourselves must be durable before anyone sees the request
        self.flush();

        if self.has_vote_quorum() {
            self.become_leader();
            return;
        }

        let args = RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.members.peers(self.id) {
            self.send(peer, RaftMessage::RequestVote(args.clone()));
        }
    }

    /// Decide whether to grant a vote. The returned response is safe to send:
    /// any state it depends on has been flushed.
    pub fn handle_request_vote(&mut self, args: RequestVoteArgs) -> RequestVoteResponse {
        self.observe_term(args.term);

        let vote_granted = args.term == self.current_term
            && self.voted_for.map_or(true, |v| v == args.candidate_id)
            && self.log.is_up_to_date(args.last_log_index, args.last_log_term);

        if vote_granted {
            if self.voted_for.is_none() {
                self.voted_for = Some(args.candidate_id);
                self.dirty = true;
            }
            self.reset_election_timer();
        }
        if self.verbose() {
            debug!(
                node_id = self.id,
                term = self.current_term,
                candidate = args.candidate_id,
                vote_granted,
                "vote decided"
            );
        }

        self.flush();
        RequestVoteResponse {
            term: self.current_term,
            vote_granted,
            source_id: self.id,
        }
    }

    pub fn handle_request_vote_response(&mut self, response: RequestVoteResponse) {
        if self.observe_term(response.term) {
            return;
        }
        if self.state != NodeState::Candidate
            || response.term != self.current_term
            || !response.vote_granted
        {
            return;
        }

        self.votes_granted.insert(response.source_id);
        if self.has_vote_quorum() {
            self.become_leader();
        }
    }

    /// Votes from current members only count.
    fn has_vote_quorum(&self) -> bool {
        let votes = self
            .votes_granted
            .iter()
            .filter(|id| self.members.contains(**id))
            .count();
        votes >= self.members.quorum_size()
    }

    pub(crate) fn become_leader(&mut self) {
        info!(
            node_id = self.id,
            term = self.current_term,
            votes = self.votes_granted.len(),
            "became leader"
        );
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.election_timer.disarm();
        self.votes_granted.clear();

        // an entry from this term makes earlier entries committable
        self.log.append(LogEntry::noop(self.current_term));
        self.dirty = true;

        self.next_index.clear();
        self.match_index.clear();
        // the previous leader may not have reached a removed server
        let removed = self.removed_server();
        self.departing = removed.into_iter().collect();
        self.pending_config_change = self
            .log
            .last_membership()
            .map(|(index, _)| index)
            .filter(|index| *index > self.commit_index);

        self.observe_membership();
        let commit_index = self.commit_index;
        for matched in self.match_index.values_mut() {
            *matched = commit_index;
        }

        self.leader_heartbeat();
    }
}
