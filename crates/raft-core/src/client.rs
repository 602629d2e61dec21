//! # client
//!
//! why: the entry point for commands from outside the cluster
//! relations: appends to the log owned by node.rs; replication.rs answers once committed
//! what: client_request

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::RaftError;
use crate::log::LogEntry;
use crate::message::ClientResponse;
use crate::node::{NodeState, Pending, RaftNode};
use crate::persist::Storage;
use crate::state_machine::StateMachine;
use crate::transport::Transport;

impl<T, S, M> RaftNode<T, S, M>
where
    T: Transport,
    S: Storage,
    M: StateMachine,
{
    /// Submit a command.
    ///
    /// Read-only commands are answered immediately from the leader's state
    /// machine. Anything else is appended to the log and sent to the peers
    /// right away; `responder` fires once that entry commits. If this node
    /// loses leadership first the responder is dropped unanswered.
    pub fn client_request(
        &mut self,
        command: Value,
        read_only: bool,
        responder: oneshot::Sender<ClientResponse>,
    ) {
        match self.state {
            NodeState::Leader => {}
            NodeState::Terminated => {
                let _ = responder.send(ClientResponse::error(RaftError::Terminated(self.id).to_string()));
                return;
            }
            NodeState::Follower | NodeState::Candidate => {
                let _ = responder.send(ClientResponse::not_leader(self.leader_hint()));
                return;
            }
        }

        if read_only {
            let response = match self.state_machine.query(&command) {
                Ok(result) => ClientResponse::success(result),
                Err(message) => ClientResponse::error(message),
            };
            let _ = responder.send(response);
            return;
        }

        let index = self.log.append(LogEntry::new(self.current_term, command));
        self.dirty = true;
        self.pending.insert(index, Pending::Client(responder));
        if self.verbose() {
            debug!(node_id = self.id, term = self.current_term, index, "client command appended");
        }
        // replicate now rather than on the next heartbeat
        self.leader_heartbeat();
    }
}
