//! # transport
//!
//! why: the node only needs "deliver this message to node X"
//! relations: implemented by raft-runtime's LocalNetwork and the test simulator
//! what: Transport trait

use crate::message::RaftMessage;
use crate::NodeId;

/// Best-effort, fire-and-forget delivery of peer rpcs.
///
/// Implementations must not call back into the node synchronously; replies
/// arrive later through `RaftNode::receive`.
pub trait Transport {
    fn send(&mut self, target: NodeId, message: RaftMessage);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, target: NodeId, message: RaftMessage) {
        (**self).send(target, message)
    }
}
