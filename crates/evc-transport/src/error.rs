use crate::node::NodeId;

/// Errors from building transports and locators.
///
/// Per-operation failures never surface here; they are reported through the
/// operation's terminal status.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("a cluster needs at least one node")]
    NoNodes,

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("replica count {requested} exceeds node count {nodes}")]
    TooManyReplicas { requested: usize, nodes: usize },

    #[error("failed to start worker for node {node}: {source}")]
    WorkerSpawn {
        node: NodeId,
        #[source]
        source: std::io::Error,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;
