use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use evc_types::{
    CachedData, ConcatType, Mutator, Operation, OperationKind, OperationStatus, StoreType,
};
use rand::Rng;
use tracing::{debug, trace};

use crate::callback::{OperationCallback, Reply};
use crate::error::{TransportError, TransportResult};
use crate::node::{CacheNode, NodeId, NodeRef};
use crate::traits::{OperationHandle, Transport};

/// Simulated network behaviour of one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeBehavior {
    /// Fixed delay before each operation executes.
    pub latency: Duration,
    /// Extra uniformly random delay in `[0, jitter]`.
    pub jitter: Duration,
}

impl NodeBehavior {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            jitter: Duration::ZERO,
        }
    }

    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_micros() as u64);
        self.latency + Duration::from_micros(extra)
    }
}

#[derive(Clone, Debug)]
struct Entry {
    flags: u32,
    data: Bytes,
    cas: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| t > now)
    }
}

fn expiry(exp: u32, now: Instant) -> Option<Instant> {
    (exp > 0).then(|| now + Duration::from_secs(u64::from(exp)))
}

type Table = HashMap<String, Entry>;

struct Job {
    operation: Operation,
    callback: Box<dyn OperationCallback>,
}

struct Worker {
    node: NodeRef,
    sender: mpsc::Sender<Job>,
    table: Arc<Mutex<Table>>,
    behavior: Arc<RwLock<NodeBehavior>>,
}

/// A simulated cluster: one worker thread per node, each owning an in-memory
/// table and executing operations with memcached semantics.
///
/// Intended for tests, demos, and embedding. Callbacks run on the node's
/// worker thread, so a bulk request spread over several nodes completes
/// concurrently, as it would against real shards.
pub struct InMemoryTransport {
    nodes: Vec<NodeRef>,
    workers: HashMap<NodeId, Worker>,
    submitted: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl InMemoryTransport {
    /// Start a cluster of `node_count` nodes with ids `0..node_count`.
    pub fn new(node_count: u32) -> TransportResult<Self> {
        if node_count == 0 {
            return Err(TransportError::NoNodes);
        }
        let cas_seq = Arc::new(AtomicU64::new(1));
        let closed = Arc::new(AtomicBool::new(false));
        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut workers = HashMap::with_capacity(node_count as usize);

        for i in 0..node_count {
            let node: NodeRef = Arc::new(CacheNode::new(NodeId(i), format!("mem://node-{i}")));
            let (sender, receiver) = mpsc::channel::<Job>();
            let table = Arc::new(Mutex::new(Table::new()));
            let behavior = Arc::new(RwLock::new(NodeBehavior::default()));

            let worker_node = node.clone();
            let worker_table = table.clone();
            let worker_behavior = behavior.clone();
            let worker_cas = cas_seq.clone();
            thread::Builder::new()
                .name(format!("evc-{}", node.id()))
                .spawn(move || {
                    run_worker(worker_node, receiver, worker_table, worker_behavior, worker_cas)
                })
                .map_err(|source| TransportError::WorkerSpawn {
                    node: node.id(),
                    source,
                })?;

            workers.insert(
                node.id(),
                Worker {
                    node: node.clone(),
                    sender,
                    table,
                    behavior,
                },
            );
            nodes.push(node);
        }

        debug!(nodes = node_count, "in-memory cluster started");
        Ok(Self {
            nodes,
            workers,
            submitted: AtomicUsize::new(0),
            closed,
        })
    }

    /// All nodes, in id order.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.clone()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRef> {
        self.workers.get(&id).map(|w| w.node.clone())
    }

    /// Change the simulated latency of a node.
    pub fn set_behavior(&self, id: NodeId, behavior: NodeBehavior) -> TransportResult<()> {
        let worker = self.workers.get(&id).ok_or(TransportError::UnknownNode(id))?;
        *worker.behavior.write().expect("behavior lock poisoned") = behavior;
        Ok(())
    }

    /// Mark a node reachable or unreachable. Operations reaching an inactive
    /// node complete with `BackendError`.
    pub fn set_active(&self, id: NodeId, active: bool) -> TransportResult<()> {
        let worker = self.workers.get(&id).ok_or(TransportError::UnknownNode(id))?;
        worker.node.set_active(active);
        Ok(())
    }

    /// Read a stored value directly, bypassing the operation path.
    pub fn peek(&self, id: NodeId, key: &str) -> Option<CachedData> {
        let worker = self.workers.get(&id)?;
        let table = worker.table.lock().expect("table lock poisoned");
        table
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| CachedData::new(e.flags, e.data.clone()))
    }

    /// Number of live keys held by a node.
    pub fn key_count(&self, id: NodeId) -> usize {
        let Some(worker) = self.workers.get(&id) else {
            return 0;
        };
        let now = Instant::now();
        let table = worker.table.lock().expect("table lock poisoned");
        table.values().filter(|e| e.is_live(now)).count()
    }

    /// Total operations submitted so far.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Refuse further submissions. Operations already queued still run.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Transport for InMemoryTransport {
    fn submit(
        &self,
        node: &NodeRef,
        operation: Operation,
        callback: Box<dyn OperationCallback>,
    ) -> OperationHandle {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let handle = OperationHandle {
            id: operation.id(),
            node: node.id(),
        };
        if self.closed.load(Ordering::Acquire) {
            callback.completed(OperationStatus::backend("transport is shut down"));
            return handle;
        }
        let Some(worker) = self.workers.get(&node.id()) else {
            callback.completed(OperationStatus::backend(format!("unknown node {}", node.id())));
            return handle;
        };
        trace!(op = %operation.id(), node = %node.id(), kind = operation.name(), "submit");
        if let Err(mpsc::SendError(job)) = worker.sender.send(Job {
            operation,
            callback,
        }) {
            job.callback
                .completed(OperationStatus::backend(format!("{} worker stopped", node.id())));
        }
        handle
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("nodes", &self.nodes.len())
            .field("submitted", &self.submitted())
            .finish()
    }
}

fn run_worker(
    node: NodeRef,
    receiver: mpsc::Receiver<Job>,
    table: Arc<Mutex<Table>>,
    behavior: Arc<RwLock<NodeBehavior>>,
    cas_seq: Arc<AtomicU64>,
) {
    for job in receiver {
        let delay = behavior.read().expect("behavior lock poisoned").delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let Job {
            operation,
            mut callback,
        } = job;
        if !node.is_active() {
            callback.completed(OperationStatus::backend(format!("{} is inactive", node.id())));
            continue;
        }
        // Replies are computed under the table lock and delivered after it
        // is released; callbacks may submit follow-up operations.
        let (replies, status) = {
            let mut table = table.lock().expect("table lock poisoned");
            execute(&mut table, &cas_seq, operation.into_kind())
        };
        for reply in replies {
            callback.received(reply);
        }
        callback.completed(status);
    }
    debug!(node = %node.id(), "worker stopped");
}

fn execute(
    table: &mut Table,
    cas_seq: &AtomicU64,
    kind: OperationKind,
) -> (Vec<Reply>, OperationStatus) {
    let now = Instant::now();
    let next_cas = || cas_seq.fetch_add(1, Ordering::Relaxed);
    table.retain(|_, e| e.is_live(now));

    match kind {
        OperationKind::Get { key } => match table.get(&key) {
            Some(e) => (vec![value_reply(&key, e)], OperationStatus::success()),
            None => (Vec::new(), OperationStatus::not_found()),
        },
        OperationKind::GetBulk { keys } => {
            let replies = keys
                .iter()
                .filter_map(|k| table.get(k).map(|e| value_reply(k, e)))
                .collect();
            (replies, OperationStatus::success())
        }
        OperationKind::GetAndTouch { key, exp } => match table.get_mut(&key) {
            Some(e) => {
                e.expires_at = expiry(exp, now);
                (vec![value_reply(&key, e)], OperationStatus::success())
            }
            None => (Vec::new(), OperationStatus::not_found()),
        },
        OperationKind::Store {
            store_type,
            key,
            flags,
            exp,
            data,
        } => {
            let exists = table.contains_key(&key);
            match (store_type, exists) {
                (StoreType::Add, true) => return (Vec::new(), OperationStatus::exists()),
                (StoreType::Replace, false) => return (Vec::new(), OperationStatus::not_found()),
                _ => {}
            }
            let cas = next_cas();
            table.insert(
                key.clone(),
                Entry {
                    flags,
                    data,
                    cas,
                    expires_at: expiry(exp, now),
                },
            );
            (vec![Reply::Cas { key, cas }], OperationStatus::success())
        }
        OperationKind::Concat {
            concat_type,
            key,
            data,
        } => match table.get_mut(&key) {
            Some(e) => {
                let mut joined = Vec::with_capacity(e.data.len() + data.len());
                match concat_type {
                    ConcatType::Append => {
                        joined.extend_from_slice(&e.data);
                        joined.extend_from_slice(&data);
                    }
                    ConcatType::Prepend => {
                        joined.extend_from_slice(&data);
                        joined.extend_from_slice(&e.data);
                    }
                }
                e.data = Bytes::from(joined);
                e.cas = next_cas();
                (vec![Reply::Cas { key, cas: e.cas }], OperationStatus::success())
            }
            None => (Vec::new(), OperationStatus::not_found()),
        },
        OperationKind::Delete { key } => match table.remove(&key) {
            Some(_) => (Vec::new(), OperationStatus::success()),
            None => (Vec::new(), OperationStatus::not_found()),
        },
        OperationKind::Touch { key, exp } => match table.get_mut(&key) {
            Some(e) => {
                e.expires_at = expiry(exp, now);
                (Vec::new(), OperationStatus::success())
            }
            None => (Vec::new(), OperationStatus::not_found()),
        },
        OperationKind::Mutate {
            mutator,
            key,
            by,
            default,
            exp,
        } => match table.get_mut(&key) {
            Some(e) => {
                let current = std::str::from_utf8(&e.data)
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok());
                let Some(current) = current else {
                    return (
                        Vec::new(),
                        OperationStatus::backend("cannot increment or decrement non-numeric value"),
                    );
                };
                let updated = match mutator {
                    Mutator::Incr => current.wrapping_add(by),
                    Mutator::Decr => current.saturating_sub(by),
                };
                e.data = Bytes::from(updated.to_string());
                e.cas = next_cas();
                (vec![Reply::Counter(updated)], OperationStatus::success())
            }
            None => match default {
                Some(initial) => {
                    table.insert(
                        key,
                        Entry {
                            flags: 0,
                            data: Bytes::from(initial.to_string()),
                            cas: next_cas(),
                            expires_at: expiry(exp, now),
                        },
                    );
                    (vec![Reply::Counter(initial)], OperationStatus::success())
                }
                None => (Vec::new(), OperationStatus::not_found()),
            },
        },
    }
}

fn value_reply(key: &str, entry: &Entry) -> Reply {
    Reply::Value {
        key: key.to_string(),
        flags: entry.flags,
        cas: entry.cas,
        data: entry.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evc_types::StatusCode;

    /// Forwards every notification to a channel so tests can block on it.
    struct Collect {
        replies: Vec<Reply>,
        tx: mpsc::Sender<(Vec<Reply>, OperationStatus)>,
    }

    impl OperationCallback for Collect {
        fn received(&mut self, reply: Reply) {
            self.replies.push(reply);
        }

        fn completed(self: Box<Self>, status: OperationStatus) {
            let _ = self.tx.send((self.replies, status));
        }
    }

    fn run(t: &InMemoryTransport, node: NodeId, kind: OperationKind) -> (Vec<Reply>, OperationStatus) {
        let (tx, rx) = mpsc::channel();
        let node = t.node(node).unwrap();
        t.submit(
            &node,
            Operation::new(kind),
            Box::new(Collect {
                replies: Vec::new(),
                tx,
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn set(key: &str, data: &'static [u8]) -> OperationKind {
        OperationKind::Store {
            store_type: StoreType::Set,
            key: key.into(),
            flags: 7,
            exp: 0,
            data: Bytes::from_static(data),
        }
    }

    // -----------------------------------------------------------------------
    // Storage semantics
    // -----------------------------------------------------------------------

    #[test]
    fn set_then_get() {
        let t = InMemoryTransport::new(1).unwrap();
        let (replies, status) = run(&t, NodeId(0), set("k", b"v"));
        assert!(status.is_success());
        assert!(matches!(replies[0], Reply::Cas { .. }));

        let (replies, status) = run(&t, NodeId(0), OperationKind::Get { key: "k".into() });
        assert!(status.is_success());
        match &replies[0] {
            Reply::Value { key, flags, data, .. } => {
                assert_eq!(key, "k");
                assert_eq!(*flags, 7);
                assert_eq!(&data[..], b"v");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn get_missing_is_not_found() {
        let t = InMemoryTransport::new(1).unwrap();
        let (replies, status) = run(&t, NodeId(0), OperationKind::Get { key: "nope".into() });
        assert!(replies.is_empty());
        assert_eq!(status.code(), StatusCode::NotFound);
    }

    #[test]
    fn add_on_existing_key_fails() {
        let t = InMemoryTransport::new(1).unwrap();
        run(&t, NodeId(0), set("k", b"v"));
        let (_, status) = run(
            &t,
            NodeId(0),
            OperationKind::Store {
                store_type: StoreType::Add,
                key: "k".into(),
                flags: 0,
                exp: 0,
                data: Bytes::from_static(b"w"),
            },
        );
        assert_eq!(status.code(), StatusCode::AlreadyExists);
    }

    #[test]
    fn replace_on_missing_key_fails() {
        let t = InMemoryTransport::new(1).unwrap();
        let (_, status) = run(
            &t,
            NodeId(0),
            OperationKind::Store {
                store_type: StoreType::Replace,
                key: "k".into(),
                flags: 0,
                exp: 0,
                data: Bytes::from_static(b"w"),
            },
        );
        assert_eq!(status.code(), StatusCode::NotFound);
    }

    #[test]
    fn append_and_prepend() {
        let t = InMemoryTransport::new(1).unwrap();
        let append = |data: &'static [u8]| OperationKind::Concat {
            concat_type: ConcatType::Append,
            key: "k".into(),
            data: Bytes::from_static(data),
        };
        let (_, status) = run(&t, NodeId(0), append(b"x"));
        assert_eq!(status.code(), StatusCode::NotFound);

        run(&t, NodeId(0), set("k", b"b"));
        run(&t, NodeId(0), append(b"c"));
        run(
            &t,
            NodeId(0),
            OperationKind::Concat {
                concat_type: ConcatType::Prepend,
                key: "k".into(),
                data: Bytes::from_static(b"a"),
            },
        );
        assert_eq!(&t.peek(NodeId(0), "k").unwrap().data[..], b"abc");
    }

    #[test]
    fn delete_and_touch() {
        let t = InMemoryTransport::new(1).unwrap();
        run(&t, NodeId(0), set("k", b"v"));
        let (_, status) = run(&t, NodeId(0), OperationKind::Touch { key: "k".into(), exp: 60 });
        assert!(status.is_success());
        let (_, status) = run(&t, NodeId(0), OperationKind::Delete { key: "k".into() });
        assert!(status.is_success());
        let (_, status) = run(&t, NodeId(0), OperationKind::Delete { key: "k".into() });
        assert_eq!(status.code(), StatusCode::NotFound);
        let (_, status) = run(&t, NodeId(0), OperationKind::Touch { key: "k".into(), exp: 60 });
        assert_eq!(status.code(), StatusCode::NotFound);
    }

    #[test]
    fn counters() {
        let t = InMemoryTransport::new(1).unwrap();
        let mutate = |mutator, by, default| OperationKind::Mutate {
            mutator,
            key: "n".into(),
            by,
            default,
            exp: 0,
        };
        let (_, status) = run(&t, NodeId(0), mutate(Mutator::Incr, 1, None));
        assert_eq!(status.code(), StatusCode::NotFound);

        let (replies, _) = run(&t, NodeId(0), mutate(Mutator::Incr, 1, Some(10)));
        assert_eq!(replies, vec![Reply::Counter(10)]);
        let (replies, _) = run(&t, NodeId(0), mutate(Mutator::Incr, 5, Some(10)));
        assert_eq!(replies, vec![Reply::Counter(15)]);
        let (replies, _) = run(&t, NodeId(0), mutate(Mutator::Decr, 100, None));
        assert_eq!(replies, vec![Reply::Counter(0)]);
    }

    #[test]
    fn non_numeric_counter_is_backend_error() {
        let t = InMemoryTransport::new(1).unwrap();
        run(&t, NodeId(0), set("n", b"abc"));
        let (_, status) = run(
            &t,
            NodeId(0),
            OperationKind::Mutate {
                mutator: Mutator::Incr,
                key: "n".into(),
                by: 1,
                default: None,
                exp: 0,
            },
        );
        assert_eq!(status.code(), StatusCode::BackendError);
    }

    #[test]
    fn bulk_get_returns_only_present_keys() {
        let t = InMemoryTransport::new(1).unwrap();
        run(&t, NodeId(0), set("a", b"1"));
        run(&t, NodeId(0), set("c", b"3"));
        let (replies, status) = run(
            &t,
            NodeId(0),
            OperationKind::GetBulk {
                keys: vec!["a".into(), "b".into(), "c".into()],
            },
        );
        assert!(status.is_success());
        assert_eq!(replies.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Cluster behaviour
    // -----------------------------------------------------------------------

    #[test]
    fn inactive_node_fails_operations() {
        let t = InMemoryTransport::new(2).unwrap();
        t.set_active(NodeId(1), false).unwrap();
        let (_, status) = run(&t, NodeId(1), OperationKind::Get { key: "k".into() });
        assert_eq!(status.code(), StatusCode::BackendError);
        let (_, status) = run(&t, NodeId(0), OperationKind::Get { key: "k".into() });
        assert_eq!(status.code(), StatusCode::NotFound);
    }

    #[test]
    fn shutdown_rejects_submissions() {
        let t = InMemoryTransport::new(1).unwrap();
        t.shutdown();
        let (_, status) = run(&t, NodeId(0), OperationKind::Get { key: "k".into() });
        assert_eq!(status.code(), StatusCode::BackendError);
        assert_eq!(t.submitted(), 1);
    }

    #[test]
    fn latency_delays_completion() {
        let t = InMemoryTransport::new(1).unwrap();
        t.set_behavior(NodeId(0), NodeBehavior::with_latency(Duration::from_millis(30)))
            .unwrap();
        let start = Instant::now();
        run(&t, NodeId(0), OperationKind::Get { key: "k".into() });
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn unknown_node_errors() {
        let t = InMemoryTransport::new(1).unwrap();
        assert!(matches!(
            t.set_active(NodeId(5), false),
            Err(TransportError::UnknownNode(NodeId(5)))
        ));
        assert!(InMemoryTransport::new(0).is_err());
    }

    #[test]
    fn key_count_tracks_live_keys() {
        let t = InMemoryTransport::new(1).unwrap();
        run(&t, NodeId(0), set("a", b"1"));
        run(&t, NodeId(0), set("b", b"2"));
        assert_eq!(t.key_count(NodeId(0)), 2);
    }
}
