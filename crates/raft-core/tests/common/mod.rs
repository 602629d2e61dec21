//! # test harness
//!
//! why: drive whole clusters deterministically without threads or sockets
//! relations: shared by comprehensive_tests.rs
//! what: key/value state machine, recording transport, discrete-event Cluster
//!       simulator with partitions, crash/restart and safety checks

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use raft_core::{
    ClientResponse, FnStateMachine, LogIndex, MemoryStorage, MembershipResponse, NodeId,
    NodeState, PersistentState, RaftConfig, RaftMessage, RaftNode, Storage, Term, Transport,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

// -- state machine --

pub type Kv = BTreeMap<String, Value>;
pub type KvApply = fn(&mut Kv, &Value) -> Result<Value, String>;
pub type KvMachine = FnStateMachine<Kv, KvApply>;

/// `{"op": "set", "key": k, "value": v}` and `{"op": "get", "key": k}`.
pub fn kv_apply(state: &mut Kv, command: &Value) -> Result<Value, String> {
    let key = command["key"]
        .as_str()
        .ok_or_else(|| format!("missing key in {command}"))?;
    match command["op"].as_str() {
        Some("set") => {
            state.insert(key.to_string(), command["value"].clone());
            Ok(command["value"].clone())
        }
        Some("get") => Ok(state.get(key).cloned().unwrap_or(Value::Null)),
        other => Err(format!("unknown op {other:?}")),
    }
}

pub fn kv_machine() -> KvMachine {
    FnStateMachine::new(Kv::new(), kv_apply as KvApply)
}

pub fn set(key: &str, value: i64) -> Value {
    json!({"op": "set", "key": key, "value": value})
}

pub fn get(key: &str) -> Value {
    json!({"op": "get", "key": key})
}

pub fn config(members: &[NodeId], bootstrap: bool) -> RaftConfig {
    RaftConfig {
        election_timeout_base_ms: 100,
        heartbeat_interval_ms: 20,
        is_bootstrap_node: bootstrap,
        initial_members: members.to_vec(),
        rng_seed: Some(42),
        ..Default::default()
    }
}

// -- a single node with its outbox --

/// Transport that only records what was sent.
#[derive(Clone, Default)]
pub struct Outbox {
    sent: Rc<RefCell<Vec<(NodeId, RaftMessage)>>>,
}

impl Outbox {
    pub fn take(&self) -> Vec<(NodeId, RaftMessage)> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }
}

impl Transport for Outbox {
    fn send(&mut self, target: NodeId, message: RaftMessage) {
        self.sent.borrow_mut().push((target, message));
    }
}

pub type TestNode = RaftNode<Outbox, MemoryStorage, KvMachine>;

/// Open a node whose storage already holds `state`.
pub fn node_with_state(
    id: NodeId,
    config: RaftConfig,
    state: Option<PersistentState>,
) -> (TestNode, Outbox, MemoryStorage) {
    let outbox = Outbox::default();
    let mut storage = MemoryStorage::new();
    if let Some(state) = state {
        storage.save(&state).unwrap();
    }
    let node = RaftNode::open(id, config, outbox.clone(), storage.clone(), kv_machine(), 0).unwrap();
    (node, outbox, storage)
}

// -- cluster simulator --

pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: RaftMessage,
}

type Queue = Rc<RefCell<VecDeque<Envelope>>>;

pub struct SimTransport {
    id: NodeId,
    queue: Queue,
}

impl Transport for SimTransport {
    fn send(&mut self, target: NodeId, message: RaftMessage) {
        self.queue.borrow_mut().push_back(Envelope {
            from: self.id,
            to: target,
            message,
        });
    }
}

pub type SimNode = RaftNode<SimTransport, MemoryStorage, KvMachine>;

/// Every node ticks on the same millisecond clock; messages are delivered
/// in send order, instantly, unless an endpoint is isolated or down.
pub struct Cluster {
    pub now: u64,
    nodes: BTreeMap<NodeId, SimNode>,
    storages: BTreeMap<NodeId, MemoryStorage>,
    configs: BTreeMap<NodeId, RaftConfig>,
    queue: Queue,
    isolated: BTreeSet<NodeId>,
    leaders_by_term: BTreeMap<Term, NodeId>,
    commit_seen: BTreeMap<NodeId, LogIndex>,
}

impl Cluster {
    /// A cluster of `members`; the first one bootstraps.
    pub fn new(members: &[NodeId]) -> Self {
        let mut cluster = Self {
            now: 0,
            nodes: BTreeMap::new(),
            storages: BTreeMap::new(),
            configs: BTreeMap::new(),
            queue: Rc::new(RefCell::new(VecDeque::new())),
            isolated: BTreeSet::new(),
            leaders_by_term: BTreeMap::new(),
            commit_seen: BTreeMap::new(),
        };
        for (i, id) in members.iter().enumerate() {
            cluster.start(*id, config(members, i == 0));
        }
        cluster.deliver_all();
        cluster
    }

    /// Open a node on its (possibly already populated) storage.
    pub fn start(&mut self, id: NodeId, config: RaftConfig) {
        let storage = self.storages.entry(id).or_default().clone();
        let transport = SimTransport {
            id,
            queue: self.queue.clone(),
        };
        let node = RaftNode::open(id, config.clone(), transport, storage, kv_machine(), self.now).unwrap();
        self.configs.insert(id, config);
        self.commit_seen.insert(id, node.commit_index());
        self.nodes.insert(id, node);
    }

    /// Drop the node and everything in flight to it; storage survives.
    pub fn crash(&mut self, id: NodeId) {
        self.nodes.remove(&id);
        self.queue.borrow_mut().retain(|e| e.to != id);
    }

    pub fn restart(&mut self, id: NodeId) {
        let config = self.configs[&id].clone();
        self.start(id, config);
    }

    pub fn isolate(&mut self, id: NodeId) {
        self.isolated.insert(id);
    }

    pub fn heal(&mut self, id: NodeId) {
        self.isolated.remove(&id);
    }

    pub fn storage(&self, id: NodeId) -> &MemoryStorage {
        &self.storages[&id]
    }

    pub fn node(&self, id: NodeId) -> &SimNode {
        &self.nodes[&id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SimNode {
        self.nodes.get_mut(&id).unwrap()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn deliver_all(&mut self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(envelope) = next else { break };
            if self.isolated.contains(&envelope.from) || self.isolated.contains(&envelope.to) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&envelope.to) {
                node.receive(envelope.message);
            }
        }
        self.check_safety();
    }

    /// Advance the clock `ms` milliseconds, one millisecond at a time.
    pub fn advance(&mut self, ms: u64) {
        for _ in 0..ms {
            self.now += 1;
            let now = self.now;
            for node in self.nodes.values_mut() {
                node.tick(now);
            }
            self.deliver_all();
        }
    }

    /// Advance until `done` holds or `max_ms` passes.
    pub fn run_until(&mut self, max_ms: u64, mut done: impl FnMut(&Cluster) -> bool) -> bool {
        for _ in 0..max_ms {
            if done(self) {
                return true;
            }
            self.advance(1);
        }
        done(self)
    }

    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.state() == NodeState::Leader)
            .map(|n| n.id())
            .collect()
    }

    /// The leader of the highest term, if any.
    pub fn leader(&self) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.state() == NodeState::Leader)
            .max_by_key(|n| n.current_term())
            .map(|n| n.id())
    }

    pub fn client_request(&mut self, id: NodeId, command: Value) -> oneshot::Receiver<ClientResponse> {
        let (tx, rx) = oneshot::channel();
        self.node_mut(id).client_request(command, false, tx);
        self.deliver_all();
        rx
    }

    pub fn add_server(&mut self, leader: NodeId, id: NodeId) -> oneshot::Receiver<MembershipResponse> {
        let (tx, rx) = oneshot::channel();
        self.node_mut(leader).add_server(id, tx);
        self.deliver_all();
        rx
    }

    pub fn remove_server(&mut self, leader: NodeId, id: NodeId) -> oneshot::Receiver<MembershipResponse> {
        let (tx, rx) = oneshot::channel();
        self.node_mut(leader).remove_server(id, tx);
        self.deliver_all();
        rx
    }

    pub fn kv(&self, id: NodeId) -> &Kv {
        self.node(id).state_machine().state()
    }

    /// Election safety, commit monotonicity, applied <= committed, and log
    /// matching up to every pair's common commit point.
    fn check_safety(&mut self) {
        for node in self.nodes.values() {
            if node.state() == NodeState::Leader {
                let leader = *self.leaders_by_term.entry(node.current_term()).or_insert(node.id());
                assert_eq!(
                    leader,
                    node.id(),
                    "two leaders in term {}: {leader} and {}",
                    node.current_term(),
                    node.id()
                );
            }
            let seen = self.commit_seen.entry(node.id()).or_insert(0);
            assert!(node.commit_index() >= *seen, "commit index went backwards on {}", node.id());
            *seen = node.commit_index();
            assert!(node.last_applied() <= node.commit_index());
        }

        let nodes: Vec<&SimNode> = self.nodes.values().collect();
        for (i, a) in nodes.iter().enumerate() {
            for b in &nodes[i + 1..] {
                let shared = a.log().len().min(b.log().len());
                for index in 0..shared as LogIndex {
                    let (ea, eb) = (a.log().get(index).unwrap(), b.log().get(index).unwrap());
                    if ea.term == eb.term {
                        assert_eq!(ea, eb, "log matching broken at {index} between {} and {}", a.id(), b.id());
                    }
                }
                let committed = a.commit_index().min(b.commit_index());
                for index in 0..=committed {
                    assert_eq!(a.log().get(index), b.log().get(index), "committed entry {index} differs");
                }
            }
        }
    }
}
