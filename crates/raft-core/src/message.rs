//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, carried by any Transport
//! what: RaftMessage (tagged union of peer rpcs), their argument/response
//!       structs, and the status values returned to clients

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log::LogEntry;
use crate::{LogIndex, NodeId, Term};

/// Arguments of a vote request during leader election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
    /// node that produced this response
    pub source_id: NodeId,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit_index: LogIndex,
    /// leader's last log index when the request was built; echoed back so the
    /// leader credits exactly what it sent
    pub trailing_log_length: LogIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub source_id: NodeId,
    pub trailing_log_length: LogIndex,
    /// responder's commit index; tells the leader a removed server has seen
    /// its removal commit
    #[serde(default)]
    pub commit_index: LogIndex,
    /// responder's last log index, lets the leader skip back past a gap in one step
    #[serde(default)]
    pub last_log_index: LogIndex,
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RaftMessage {
    RequestVote(RequestVoteArgs),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    /// Term carried by the message, whatever its kind.
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(m) => m.term,
            RaftMessage::RequestVoteResponse(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendEntriesResponse(m) => m.term,
        }
    }

    /// Node that sent the message.
    pub fn source(&self) -> NodeId {
        match self {
            RaftMessage::RequestVote(m) => m.candidate_id,
            RaftMessage::RequestVoteResponse(m) => m.source_id,
            RaftMessage::AppendEntries(m) => m.leader_id,
            RaftMessage::AppendEntriesResponse(m) => m.source_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::RequestVote(_) => "requestVote",
            RaftMessage::RequestVoteResponse(_) => "requestVoteResponse",
            RaftMessage::AppendEntries(_) => "appendEntries",
            RaftMessage::AppendEntriesResponse(_) => "appendEntriesResponse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "NOT_LEADER")]
    NotLeader,
    #[serde(rename = "error")]
    Error,
}

/// Answer to a client request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub status: ClientStatus,
    /// state machine result, or the error message when `status` is `Error`
    pub result: Option<Value>,
    pub leader_hint: Option<NodeId>,
}

impl ClientResponse {
    pub fn success(result: Value) -> Self {
        Self {
            status: ClientStatus::Success,
            result: Some(result),
            leader_hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ClientStatus::Error,
            result: Some(Value::String(message.into())),
            leader_hint: None,
        }
    }

    pub fn not_leader(leader_hint: Option<NodeId>) -> Self {
        Self {
            status: ClientStatus::NotLeader,
            result: None,
            leader_hint,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ClientStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Ok,
    NotLeader,
    PendingConfigChange,
    AlreadyAMember,
    NotAMember,
}

/// Answer to an add/remove server request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub status: MembershipStatus,
    pub leader_hint: Option<NodeId>,
}

impl MembershipResponse {
    pub fn new(status: MembershipStatus, leader_hint: Option<NodeId>) -> Self {
        Self {
            status,
            leader_hint,
        }
    }
}
