use std::collections::HashMap;

use crate::error::{TransportError, TransportResult};
use crate::node::{NodeId, NodeRef};
use crate::traits::NodeLocator;

/// Position of `key` on a ring of `len` nodes.
fn slot(key: &str, len: usize) -> usize {
    let hash = blake3::hash(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(head) % len as u64) as usize
}

/// The node at `start` followed by its ring successors, `count` in total.
fn ring_from(nodes: &[NodeRef], start: usize, count: usize) -> Vec<NodeRef> {
    (0..count.min(nodes.len()))
        .map(|i| nodes[(start + i) % nodes.len()].clone())
        .collect()
}

/// Hash-modulo router: blake3 of the key picks the primary, replicas are
/// the primary's successors in node order.
#[derive(Debug, Clone)]
pub struct HashLocator {
    nodes: Vec<NodeRef>,
    replica_count: usize,
}

impl HashLocator {
    pub fn new(nodes: Vec<NodeRef>) -> TransportResult<Self> {
        Self::with_replicas(nodes, 1)
    }

    /// `replica_count` includes the primary.
    pub fn with_replicas(nodes: Vec<NodeRef>, replica_count: usize) -> TransportResult<Self> {
        if nodes.is_empty() {
            return Err(TransportError::NoNodes);
        }
        if replica_count > nodes.len() {
            return Err(TransportError::TooManyReplicas {
                requested: replica_count,
                nodes: nodes.len(),
            });
        }
        Ok(Self {
            nodes,
            replica_count: replica_count.max(1),
        })
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }
}

impl NodeLocator for HashLocator {
    fn primary(&self, key: &str) -> Option<NodeRef> {
        self.nodes.get(slot(key, self.nodes.len())).cloned()
    }

    fn replicas(&self, key: &str) -> Vec<NodeRef> {
        ring_from(&self.nodes, slot(key, self.nodes.len()), self.replica_count)
    }

    fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.clone()
    }
}

/// Router with explicit key placements, falling back to hashing for keys
/// without a route. Mostly useful for pinning keys to shards in tests.
#[derive(Debug, Clone)]
pub struct StaticLocator {
    nodes: Vec<NodeRef>,
    routes: HashMap<String, usize>,
    replica_count: usize,
}

impl StaticLocator {
    pub fn new(nodes: Vec<NodeRef>) -> TransportResult<Self> {
        if nodes.is_empty() {
            return Err(TransportError::NoNodes);
        }
        Ok(Self {
            nodes,
            routes: HashMap::new(),
            replica_count: 1,
        })
    }

    /// Pin `key` to `node`.
    pub fn route(mut self, key: impl Into<String>, node: NodeId) -> TransportResult<Self> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id() == node)
            .ok_or(TransportError::UnknownNode(node))?;
        self.routes.insert(key.into(), index);
        Ok(self)
    }

    pub fn with_replicas(mut self, replica_count: usize) -> TransportResult<Self> {
        if replica_count > self.nodes.len() {
            return Err(TransportError::TooManyReplicas {
                requested: replica_count,
                nodes: self.nodes.len(),
            });
        }
        self.replica_count = replica_count.max(1);
        Ok(self)
    }

    fn index_of(&self, key: &str) -> usize {
        self.routes
            .get(key)
            .copied()
            .unwrap_or_else(|| slot(key, self.nodes.len()))
    }
}

impl NodeLocator for StaticLocator {
    fn primary(&self, key: &str) -> Option<NodeRef> {
        self.nodes.get(self.index_of(key)).cloned()
    }

    fn replicas(&self, key: &str) -> Vec<NodeRef> {
        ring_from(&self.nodes, self.index_of(key), self.replica_count)
    }

    fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::node::CacheNode;

    fn nodes(n: u32) -> Vec<NodeRef> {
        (0..n)
            .map(|i| Arc::new(CacheNode::new(NodeId(i), format!("127.0.0.1:{}", 11211 + i))))
            .collect()
    }

    #[test]
    fn empty_cluster_rejected() {
        assert!(matches!(HashLocator::new(Vec::new()), Err(TransportError::NoNodes)));
        assert!(matches!(StaticLocator::new(Vec::new()), Err(TransportError::NoNodes)));
    }

    #[test]
    fn too_many_replicas_rejected() {
        let err = HashLocator::with_replicas(nodes(2), 3).unwrap_err();
        assert!(matches!(err, TransportError::TooManyReplicas { requested: 3, nodes: 2 }));
    }

    #[test]
    fn hashing_is_deterministic() {
        let loc = HashLocator::new(nodes(5)).unwrap();
        let a = loc.primary("user:42").unwrap().id();
        let b = loc.primary("user:42").unwrap().id();
        assert_eq!(a, b);
    }

    #[test]
    fn keys_spread_over_nodes() {
        let loc = HashLocator::new(nodes(4)).unwrap();
        let used: HashSet<NodeId> = (0..200)
            .map(|i| loc.primary(&format!("key-{i}")).unwrap().id())
            .collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn replicas_start_with_primary_and_are_distinct() {
        let loc = HashLocator::with_replicas(nodes(5), 3).unwrap();
        for i in 0..50 {
            let key = format!("k{i}");
            let replicas = loc.replicas(&key);
            assert_eq!(replicas.len(), 3);
            assert_eq!(replicas[0].id(), loc.primary(&key).unwrap().id());
            let distinct: HashSet<NodeId> = replicas.iter().map(|n| n.id()).collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn static_routes_win_over_hash() {
        let loc = StaticLocator::new(nodes(3))
            .unwrap()
            .route("a", NodeId(2))
            .unwrap()
            .route("b", NodeId(2))
            .unwrap()
            .route("c", NodeId(0))
            .unwrap();
        assert_eq!(loc.primary("a").unwrap().id(), NodeId(2));
        assert_eq!(loc.primary("b").unwrap().id(), NodeId(2));
        assert_eq!(loc.primary("c").unwrap().id(), NodeId(0));
        assert!(loc.primary("unrouted").is_some());
    }

    #[test]
    fn static_route_to_unknown_node_fails() {
        let err = StaticLocator::new(nodes(2)).unwrap().route("a", NodeId(9)).unwrap_err();
        assert!(matches!(err, TransportError::UnknownNode(NodeId(9))));
    }

    #[test]
    fn static_replicas_follow_route() {
        let loc = StaticLocator::new(nodes(3))
            .unwrap()
            .route("a", NodeId(2))
            .unwrap()
            .with_replicas(2)
            .unwrap();
        let ids: Vec<NodeId> = loc.replicas("a").iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![NodeId(2), NodeId(0)]);
    }
}
