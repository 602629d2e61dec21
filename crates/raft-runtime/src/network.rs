//! # network
//!
//! why: same-process delivery of raft rpcs between node actors
//! relations: LocalTransport is the Transport each RaftNode in actor.rs owns
//! what: LocalNetwork registry with partition simulation, LocalTransport

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use raft_core::{NodeId, RaftMessage, Transport};
use tokio::sync::mpsc;
use tracing::trace;

use crate::actor::Command;

#[derive(Default)]
struct Routes {
    inboxes: HashMap<NodeId, mpsc::Sender<Command>>,
    isolated: HashSet<NodeId>,
}

/// Shared registry of running nodes. Clones share one registry.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    routes: Arc<Mutex<Routes>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: NodeId, inbox: mpsc::Sender<Command>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.inboxes.insert(id, inbox);
        }
    }

    pub(crate) fn unregister(&self, id: NodeId) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.inboxes.remove(&id);
        }
    }

    /// Drop every message to or from `id` until healed.
    pub fn isolate(&self, id: NodeId) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.isolated.insert(id);
        }
    }

    pub fn heal(&self, id: NodeId) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.isolated.remove(&id);
        }
    }

    pub fn is_registered(&self, id: NodeId) -> bool {
        self.routes
            .lock()
            .map(|routes| routes.inboxes.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn transport(&self, id: NodeId) -> LocalTransport {
        LocalTransport {
            id,
            network: self.clone(),
        }
    }

    fn deliver(&self, from: NodeId, to: NodeId, message: RaftMessage) {
        let inbox = match self.routes.lock() {
            Ok(routes) if !routes.isolated.contains(&from) && !routes.isolated.contains(&to) => {
                routes.inboxes.get(&to).cloned()
            }
            _ => None,
        };
        let Some(inbox) = inbox else {
            trace!(from, to, kind = message.kind(), "dropped: unreachable");
            return;
        };
        // a full inbox behaves like a lost packet
        if inbox.try_send(Command::Deliver(message)).is_err() {
            trace!(from, to, "dropped: inbox full or closed");
        }
    }
}

/// Sends on behalf of one node.
#[derive(Clone)]
pub struct LocalTransport {
    id: NodeId,
    network: LocalNetwork,
}

impl Transport for LocalTransport {
    fn send(&mut self, target: NodeId, message: RaftMessage) {
        self.network.deliver(self.id, target, message);
    }
}
