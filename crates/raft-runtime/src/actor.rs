//! # actor
//!
//! why: a RaftNode is single-threaded; hosts talk to it through one queue
//! relations: owns a raft_core::RaftNode; fed by network.rs and NodeHandle callers
//! what: Command, NodeHandle, spawn_node (tick loop + command dispatch)

use std::time::Duration;

use raft_core::{
    ClientResponse, MembershipResponse, NodeId, NodeState, NodeStatus, RaftConfig, RaftMessage,
    RaftNode, StateMachine, Storage,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::network::LocalNetwork;

/// How often the actor advances the node's clock.
pub const TICK_INTERVAL_MS: u64 = 5;

const INBOX_CAPACITY: usize = 1024;

/// Everything that can reach a node actor.
pub enum Command {
    Deliver(RaftMessage),
    ClientRequest {
        command: Value,
        read_only: bool,
        response_tx: oneshot::Sender<ClientResponse>,
    },
    AddServer {
        id: NodeId,
        response_tx: oneshot::Sender<MembershipResponse>,
    },
    RemoveServer {
        id: NodeId,
        response_tx: oneshot::Sender<MembershipResponse>,
    },
    Status {
        response_tx: oneshot::Sender<NodeStatus>,
    },
    Shutdown,
}

/// Cloneable handle to a running node actor.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    tx: mpsc::Sender<Command>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, RuntimeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| RuntimeError::NodeStopped(self.id))?;
        response_rx
            .await
            .map_err(|_| RuntimeError::RequestDropped(self.id))
    }

    /// Submit a command; resolves when it is applied, or immediately when
    /// this node cannot take it.
    pub async fn client_request(&self, command: Value, read_only: bool) -> Result<ClientResponse, RuntimeError> {
        self.call(|response_tx| Command::ClientRequest {
            command,
            read_only,
            response_tx,
        })
        .await
    }

    pub async fn add_server(&self, id: NodeId) -> Result<MembershipResponse, RuntimeError> {
        self.call(|response_tx| Command::AddServer { id, response_tx })
            .await
    }

    pub async fn remove_server(&self, id: NodeId) -> Result<MembershipResponse, RuntimeError> {
        self.call(|response_tx| Command::RemoveServer { id, response_tx })
            .await
    }

    pub async fn status(&self) -> Result<NodeStatus, RuntimeError> {
        self.call(|response_tx| Command::Status { response_tx })
            .await
            .map_err(|_| RuntimeError::NodeStopped(self.id))
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| RuntimeError::NodeStopped(self.id))
    }
}

/// Open a node and run it on its own task until shutdown or removal.
pub fn spawn_node<S, M>(
    id: NodeId,
    config: RaftConfig,
    network: &LocalNetwork,
    storage: S,
    state_machine: M,
) -> Result<(NodeHandle, JoinHandle<()>), RuntimeError>
where
    S: Storage + Send + 'static,
    M: StateMachine + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(INBOX_CAPACITY);
    let started = Instant::now();
    let clock = move || started.elapsed().as_millis() as u64;

    let mut node = RaftNode::open(id, config, network.transport(id), storage, state_machine, clock())?;
    network.register(id, tx.clone());

    let network = network.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => dispatch(&mut node, command),
                },
                _ = ticker.tick() => node.tick(clock()),
            }

            if node.state() == NodeState::Terminated {
                info!(node_id = id, "node removed from cluster");
                break;
            }
        }

        node.terminate();
        network.unregister(id);
        debug!(node_id = id, "actor stopped");
    });

    Ok((NodeHandle { id, tx }, task))
}

fn dispatch<T, S, M>(node: &mut RaftNode<T, S, M>, command: Command)
where
    T: raft_core::Transport,
    S: Storage,
    M: StateMachine,
{
    match command {
        Command::Deliver(message) => node.receive(message),
        Command::ClientRequest {
            command,
            read_only,
            response_tx,
        } => node.client_request(command, read_only, response_tx),
        Command::AddServer { id, response_tx } => node.add_server(id, response_tx),
        Command::RemoveServer { id, response_tx } => node.remove_server(id, response_tx),
        Command::Status { response_tx } => {
            let _ = response_tx.send(node.status());
        }
        Command::Shutdown => node.terminate(),
    }
}
