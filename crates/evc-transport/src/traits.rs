use evc_types::{Operation, OperationId};

use crate::callback::OperationCallback;
use crate::node::{NodeId, NodeRef};

/// Receipt for a submitted operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationHandle {
    pub id: OperationId,
    pub node: NodeId,
}

/// Submits operations to cache nodes.
///
/// All implementations must satisfy these invariants:
/// - `submit` never blocks on the node's answer.
/// - The callback's terminal notification fires exactly once, including when
///   the node is inactive or the transport is shutting down (with a
///   `BackendError` status in those cases).
/// - Notifications for one operation are delivered in order.
pub trait Transport: Send + Sync {
    fn submit(
        &self,
        node: &NodeRef,
        operation: Operation,
        callback: Box<dyn OperationCallback>,
    ) -> OperationHandle;
}

/// Maps keys to the nodes that own them.
pub trait NodeLocator: Send + Sync {
    /// The node that owns `key`, or `None` for an empty cluster.
    fn primary(&self, key: &str) -> Option<NodeRef>;

    /// Every node that holds a copy of `key`, primary first, without
    /// duplicates.
    fn replicas(&self, key: &str) -> Vec<NodeRef>;

    /// All nodes known to the locator.
    fn nodes(&self) -> Vec<NodeRef>;
}
