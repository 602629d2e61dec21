//! # cluster
//!
//! why: start, drive and inspect a whole cluster of node actors in one process
//! relations: spawns actor.rs nodes over a shared network.rs; used by main.rs and tests
//! what: LocalCluster (leader discovery, request routing, membership, crash/restart)

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use raft_core::{
    ClientResponse, ClientStatus, MembershipResponse, MembershipStatus, MemoryStorage, NodeId,
    NodeState, NodeStatus, RaftConfig, Storage,
};
use raft_storage::FileStorage;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::actor::{spawn_node, NodeHandle};
use crate::error::RuntimeError;
use crate::kv::KvStore;
use crate::network::LocalNetwork;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_REDIRECTS: usize = 8;

struct Running {
    handle: NodeHandle,
    task: JoinHandle<()>,
}

/// A cluster of [`KvStore`] nodes wired through one [`LocalNetwork`].
pub struct LocalCluster {
    config: RaftConfig,
    network: LocalNetwork,
    data_dir: Option<PathBuf>,
    memory: BTreeMap<NodeId, MemoryStorage>,
    nodes: BTreeMap<NodeId, Running>,
}

impl LocalCluster {
    /// Start nodes `1..=size`. Node 1 bootstraps when it has no saved state.
    ///
    /// With a `data_dir` each node persists under `data_dir/node-{id}`;
    /// otherwise state lives in memory for the life of the cluster.
    pub fn start(size: u64, config: RaftConfig, data_dir: Option<PathBuf>) -> Result<Self, RuntimeError> {
        config.validate()?;
        let members: Vec<NodeId> = (1..=size).collect();
        let mut cluster = Self {
            config,
            network: LocalNetwork::new(),
            data_dir,
            memory: BTreeMap::new(),
            nodes: BTreeMap::new(),
        };
        for &id in &members {
            cluster.spawn(id, members.clone(), id == 1)?;
        }
        info!(size, "cluster started");
        Ok(cluster)
    }

    fn spawn(&mut self, id: NodeId, initial_members: Vec<NodeId>, bootstrap: bool) -> Result<(), RuntimeError> {
        let config = RaftConfig {
            initial_members,
            is_bootstrap_node: bootstrap,
            ..self.config.clone()
        };
        let storage = self.open_storage(id)?;
        let (handle, task) = spawn_node(id, config, &self.network, storage, KvStore::new())?;
        self.nodes.insert(id, Running { handle, task });
        Ok(())
    }

    fn open_storage(&mut self, id: NodeId) -> Result<Box<dyn Storage + Send>, RuntimeError> {
        Ok(match &self.data_dir {
            Some(dir) => Box::new(FileStorage::new(dir.join(format!("node-{id}")))?),
            None => Box::new(self.memory.entry(id).or_default().clone()),
        })
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn handle(&self, id: NodeId) -> Result<&NodeHandle, RuntimeError> {
        self.nodes
            .get(&id)
            .map(|running| &running.handle)
            .ok_or(RuntimeError::UnknownNode(id))
    }

    /// Status of every node still running.
    pub async fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(self.nodes.len());
        for running in self.nodes.values() {
            if let Ok(status) = running.handle.status().await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// Current leader with the highest term, if any node thinks it leads.
    pub async fn leader(&self) -> Option<NodeId> {
        self.statuses()
            .await
            .into_iter()
            .filter(|status| status.state == NodeState::Leader)
            .max_by_key(|status| status.current_term)
            .map(|status| status.id)
    }

    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(leader) = self.leader().await {
                return Ok(leader);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::NoLeader(timeout.as_millis() as u64));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Send a command to the leader, following redirects and retrying
    /// requests lost to a leadership change.
    pub async fn submit(&self, command: Value, read_only: bool) -> Result<ClientResponse, RuntimeError> {
        let timeout = self.election_wait();
        let mut target = self.wait_for_leader(timeout).await?;
        let mut last = None;

        for _ in 0..MAX_REDIRECTS {
            match self.handle(target)?.client_request(command.clone(), read_only).await {
                Ok(response) if response.status == ClientStatus::NotLeader => {
                    debug!(target, hint = ?response.leader_hint, "redirected");
                    target = match response.leader_hint {
                        Some(hint) if self.nodes.contains_key(&hint) => hint,
                        _ => self.wait_for_leader(timeout).await?,
                    };
                    last = Some(response);
                }
                Ok(response) => return Ok(response),
                Err(RuntimeError::RequestDropped(node) | RuntimeError::NodeStopped(node)) => {
                    warn!(node, "request lost, retrying");
                    sleep(POLL_INTERVAL).await;
                    target = self.wait_for_leader(timeout).await?;
                }
                Err(e) => return Err(e),
            }
        }
        last.ok_or(RuntimeError::NoLeader(timeout.as_millis() as u64))
    }

    /// Start node `id` and ask the leader to add it.
    ///
    /// The new node starts outside the cluster and stays quiet until the
    /// leader's membership entry reaches it.
    pub async fn add_node(&mut self, id: NodeId) -> Result<MembershipResponse, RuntimeError> {
        if !self.nodes.contains_key(&id) {
            let members = self.ids();
            self.spawn(id, members, false)?;
        }
        self.change_membership(id, true).await
    }

    /// Ask the leader to remove node `id`. Once removed the node stops itself.
    pub async fn remove_node(&self, id: NodeId) -> Result<MembershipResponse, RuntimeError> {
        self.change_membership(id, false).await
    }

    async fn change_membership(&self, id: NodeId, add: bool) -> Result<MembershipResponse, RuntimeError> {
        let timeout = self.election_wait();
        let mut target = self.wait_for_leader(timeout).await?;

        for _ in 0..MAX_REDIRECTS {
            let handle = self.handle(target)?;
            let response = if add {
                handle.add_server(id).await
            } else {
                handle.remove_server(id).await
            };
            match response {
                Ok(response) if response.status == MembershipStatus::NotLeader => {
                    target = match response.leader_hint {
                        Some(hint) if self.nodes.contains_key(&hint) => hint,
                        _ => self.wait_for_leader(timeout).await?,
                    };
                }
                Ok(response) => return Ok(response),
                Err(RuntimeError::RequestDropped(_) | RuntimeError::NodeStopped(_)) => {
                    sleep(POLL_INTERVAL).await;
                    target = self.wait_for_leader(timeout).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(RuntimeError::NoLeader(timeout.as_millis() as u64))
    }

    /// Stop node `id` as if it crashed. Its storage is kept for [`Self::restart_node`].
    pub async fn stop_node(&mut self, id: NodeId) -> Result<(), RuntimeError> {
        let running = self.nodes.remove(&id).ok_or(RuntimeError::UnknownNode(id))?;
        // already gone when it removed itself
        let _ = running.handle.shutdown().await;
        let _ = running.task.await;
        Ok(())
    }

    /// Start a stopped node again from its saved state.
    pub fn restart_node(&mut self, id: NodeId, initial_members: Vec<NodeId>) -> Result<(), RuntimeError> {
        self.spawn(id, initial_members, false)
    }

    /// Stop every node and wait for the actors to finish.
    pub async fn shutdown(mut self) {
        let ids = self.ids();
        for id in ids {
            let _ = self.stop_node(id).await;
        }
        info!("cluster stopped");
    }

    // long enough for a couple of election rounds
    fn election_wait(&self) -> Duration {
        Duration::from_millis(self.config.election_timeout_base_ms * 10)
    }
}
