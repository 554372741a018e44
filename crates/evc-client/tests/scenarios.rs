//! End-to-end scenarios against the in-memory simulated cluster.

use std::sync::Arc;
use std::time::{Duration, Instant};

use evc_client::{CacheClient, ClientConfig, InMemoryTelemetry, MutationOutcome};
use evc_codec::{JsonTranscoder, StringTranscoder};
use evc_ops::LatchPolicy;
use evc_transport::{
    HashLocator, InMemoryTransport, NodeBehavior, NodeId, NodeLocator, StaticLocator, Transport,
};
use evc_types::{Mutator, StatusCode};
use serde::{Deserialize, Serialize};

const WAIT: Duration = Duration::from_secs(5);

struct Cluster {
    transport: Arc<InMemoryTransport>,
    client: CacheClient,
    telemetry: Arc<InMemoryTelemetry>,
}

fn cluster_with(
    nodes: u32,
    locator: impl FnOnce(&InMemoryTransport) -> Arc<dyn NodeLocator>,
    config: ClientConfig,
) -> Cluster {
    let transport = Arc::new(InMemoryTransport::new(nodes).unwrap());
    let locator = locator(&transport);
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let client = CacheClient::with_telemetry(
        config,
        transport.clone() as Arc<dyn Transport>,
        locator,
        telemetry.clone(),
    )
    .unwrap();
    Cluster {
        transport,
        client,
        telemetry,
    }
}

fn cluster(nodes: u32) -> Cluster {
    cluster_with(
        nodes,
        |t| Arc::new(HashLocator::new(t.nodes()).unwrap()),
        ClientConfig::default(),
    )
}

fn set(c: &Cluster, key: &str, value: &str) {
    let done = c
        .client
        .set(key, 0, &value.to_string(), &StringTranscoder::default(), None)
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert!(done.is_success(), "set {key}: {}", done.status());
}

fn get(c: &Cluster, key: &str) -> Option<String> {
    c.client
        .get(key, StringTranscoder::default())
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap()
        .value()
        .unwrap()
        .cloned()
}

// ---------------------------------------------------------------------------
// Bulk get
// ---------------------------------------------------------------------------

#[test]
fn bulk_get_merges_two_shards() {
    let c = cluster_with(
        2,
        |t| {
            Arc::new(
                StaticLocator::new(t.nodes())
                    .unwrap()
                    .route("a", NodeId(0))
                    .unwrap()
                    .route("b", NodeId(0))
                    .unwrap()
                    .route("c", NodeId(1))
                    .unwrap(),
            )
        },
        ClientConfig::default(),
    );
    set(&c, "a", "1");
    set(&c, "b", "2");
    set(&c, "c", "3");

    let before = c.transport.submitted();
    let result = c
        .client
        .get_bulk(["a", "b", "c"], StringTranscoder::default())
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(c.transport.submitted() - before, 2);
    assert_eq!(result.len(), 3);
    assert_eq!(result.get("a").map(String::as_str), Some("1"));
    assert_eq!(result.get("b").map(String::as_str), Some("2"));
    assert_eq!(result.get("c").map(String::as_str), Some("3"));
    assert_eq!(c.telemetry.sizes("EVCACHE-BulkOperation-DataSize").len(), 3);
}

#[test]
fn bulk_get_drops_keys_on_inactive_node() {
    let c = cluster(4);
    let keys: Vec<String> = (0..40).map(|i| format!("key-{i}")).collect();
    for k in &keys {
        set(&c, k, k);
    }
    let down = c.client.node_for(&keys[0]).unwrap();
    c.transport.set_active(down.id(), false).unwrap();

    let result = c
        .client
        .get_bulk(&keys, StringTranscoder::default())
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert!(result.get(&keys[0]).is_none());
    for k in &keys {
        let on_down_node = c.client.node_for(k).unwrap().id() == down.id();
        assert_eq!(result.get(k).is_some(), !on_down_node, "{k}");
    }
}

#[test]
fn bulk_get_with_every_node_down_is_immediately_empty() {
    let c = cluster(2);
    c.transport.set_active(NodeId(0), false).unwrap();
    c.transport.set_active(NodeId(1), false).unwrap();
    let f = c
        .client
        .get_bulk(["a", "b"], StringTranscoder::default())
        .unwrap();
    assert!(f.is_done());
    let r = f.poll().unwrap();
    assert!(r.is_empty());
    assert_eq!(r.status().code(), StatusCode::Success);
}

#[tokio::test]
async fn bulk_get_async() {
    let c = cluster(3);
    set(&c, "x", "1");
    let r = c
        .client
        .get_bulk(["x", "missing"], StringTranscoder::default())
        .unwrap()
        .completed()
        .await;
    assert_eq!(r.len(), 1);
}

// ---------------------------------------------------------------------------
// Single-key reads and writes
// ---------------------------------------------------------------------------

#[test]
fn set_get_delete() {
    let c = cluster(3);
    set(&c, "k", "v");
    assert_eq!(get(&c, "k").as_deref(), Some("v"));

    let deleted = c.client.delete("k", None).unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(deleted.value(), Ok(Some(&true)));
    assert_eq!(get(&c, "k"), None);

    let again = c.client.delete("k", None).unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(again.status().code(), StatusCode::NotFound);
    assert_eq!(c.telemetry.counter("EVCACHE-DeleteOperation-ERR_NOT_FOUND"), 1);
}

#[test]
fn add_and_replace_follow_key_state() {
    let c = cluster(1);
    let tc = StringTranscoder::default();
    let replace = c
        .client
        .replace("k", 0, &"r".to_string(), &tc, None)
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(replace.status().code(), StatusCode::NotFound);

    let add = c.client.add("k", 0, &"a".to_string(), &tc, None).unwrap().wait_timeout(WAIT).unwrap();
    assert!(add.is_success());
    let add_again = c.client.add("k", 0, &"b".to_string(), &tc, None).unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(add_again.status().code(), StatusCode::AlreadyExists);
    assert_eq!(get(&c, "k").as_deref(), Some("a"));
}

#[test]
fn get_and_touch_returns_cas() {
    let c = cluster(2);
    let stored = c
        .client
        .set("k", 0, &"v".to_string(), &StringTranscoder::default(), None)
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    let cas = stored.cas().unwrap();

    let touched = c
        .client
        .get_and_touch("k", 300, StringTranscoder::default())
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    let value = touched.value().unwrap().unwrap();
    assert_eq!(value.value, "v");
    assert_eq!(value.cas, cas);
}

#[test]
fn json_values_round_trip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    let c = cluster(2);
    let tc = JsonTranscoder::<Profile>::default();
    let profile = Profile {
        name: "ada".into(),
        visits: 3,
    };
    c.client.set("p", 0, &profile, &tc, None).unwrap().wait_timeout(WAIT).unwrap();
    let done = c.client.get("p", tc).unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(done.value().unwrap(), Some(&profile));

    // Read back with the wrong codec: a decode error, not a miss.
    let wrong = c
        .client
        .get("p", StringTranscoder::default())
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert!(wrong.value().is_err());
}

#[test]
fn get_with_listener_fires_on_node_thread() {
    let c = cluster(1);
    set(&c, "k", "v");
    let (tx, rx) = std::sync::mpsc::channel();
    c.client
        .get_with_listener("k", StringTranscoder::default(), move |done| {
            let _ = tx.send(done.value().unwrap().cloned());
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().as_deref(), Some("v"));
}

#[test]
fn operations_on_inactive_node_fail_with_backend_error() {
    let c = cluster(1);
    c.transport.set_active(NodeId(0), false).unwrap();
    let done = c.client.touch("k", 10, None).unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(done.status().code(), StatusCode::BackendError);
    assert_eq!(done.value(), Ok(Some(&false)));
}

// ---------------------------------------------------------------------------
// Append-or-add
// ---------------------------------------------------------------------------

#[test]
fn append_or_add_creates_missing_key() {
    let c = cluster(2);
    let before = c.transport.submitted();
    let done = c
        .client
        .append_or_add("k", 0, &"x".to_string(), &StringTranscoder::default(), None)
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert!(done.is_success());
    assert_eq!(c.transport.submitted() - before, 2);
    assert_eq!(get(&c, "k").as_deref(), Some("x"));
    assert_eq!(c.telemetry.counter("EVCACHE-AoA-AppendOperation-FAIL"), 1);
    assert_eq!(c.telemetry.counter("EVCACHE-AoA-AddOperation-SUCCESS"), 1);
}

#[test]
fn append_or_add_appends_to_existing_key() {
    let c = cluster(2);
    set(&c, "k", "a");
    let before = c.transport.submitted();
    let done = c
        .client
        .append_or_add("k", 0, &"b".to_string(), &StringTranscoder::default(), None)
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert!(done.is_success());
    assert_eq!(c.transport.submitted() - before, 1);
    assert_eq!(get(&c, "k").as_deref(), Some("ab"));
}

#[test]
fn concurrent_append_or_add_loses_nothing() {
    let c = Arc::new(cluster(1));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = c.clone();
            std::thread::spawn(move || {
                c.client
                    .append_or_add("log", 0, &"x".to_string(), &StringTranscoder::default(), None)
                    .unwrap()
                    .wait_timeout(WAIT)
                    .unwrap()
                    .is_success()
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
    assert_eq!(get(&c, "log").as_deref(), Some("xxxxxxxx"));
}

// ---------------------------------------------------------------------------
// Replicated writes
// ---------------------------------------------------------------------------

#[test]
fn quorum_write_does_not_wait_for_slow_replica() {
    let c = cluster_with(
        3,
        |t| Arc::new(HashLocator::with_replicas(t.nodes(), 3).unwrap()),
        ClientConfig::default(),
    );
    let replicas = c.client.write_latch("k", LatchPolicy::All).expected_count();
    assert_eq!(replicas, 3);
    c.transport
        .set_behavior(NodeId(2), NodeBehavior::with_latency(Duration::from_millis(500)))
        .unwrap();

    let latch = c.client.write_latch("k", LatchPolicy::Quorum);
    let start = Instant::now();
    c.client
        .set_replicated("k", 0, &"v".to_string(), &StringTranscoder::default(), &latch)
        .unwrap();
    assert!(latch.await_policy(WAIT));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(latch.success_count() >= 2);

    assert!(latch.await_all(WAIT));
    assert_eq!(latch.success_count(), 3);
    for id in 0..3 {
        assert!(c.transport.peek(NodeId(id), "k").is_some());
    }
}

#[test]
fn all_policy_fails_fast_when_a_replica_is_down() {
    let c = cluster_with(
        3,
        |t| Arc::new(HashLocator::with_replicas(t.nodes(), 3).unwrap()),
        ClientConfig::default(),
    );
    c.transport.set_active(NodeId(1), false).unwrap();
    let latch = c.client.write_latch("k", LatchPolicy::All);
    c.client.delete_replicated("k", &latch).unwrap();
    assert!(!latch.await_policy(WAIT));
    assert!(latch.failure_count() >= 1);
}

#[tokio::test]
async fn replicated_touch_async_latch() {
    let c = cluster_with(
        2,
        |t| Arc::new(HashLocator::with_replicas(t.nodes(), 2).unwrap()),
        ClientConfig::default(),
    );
    let latch = c.client.write_latch("k", LatchPolicy::One);
    c.client
        .set_replicated("k", 0, &"v".to_string(), &StringTranscoder::default(), &latch)
        .unwrap();
    assert!(latch.await_all_async(WAIT).await);

    let touch_latch = c.client.write_latch("k", LatchPolicy::All);
    c.client.touch_replicated("k", 60, &touch_latch).unwrap();
    assert!(touch_latch.await_policy_async(WAIT).await);
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[test]
fn counters_create_increment_and_saturate() {
    let c = cluster(2);
    assert_eq!(c.client.incr("n", 1, None, 0).unwrap(), -1);
    assert_eq!(c.client.incr("n", 1, Some(5), 0).unwrap(), 5);
    assert_eq!(c.client.incr("n", 3, Some(5), 0).unwrap(), 8);
    assert_eq!(c.client.decr("n", 100, None, 0).unwrap(), 0);
    assert_eq!(c.telemetry.duration_count("EVCACHE-IncrOperation"), 3);
}

#[test]
fn mutate_timeout_returns_recorded_default() {
    let c = cluster_with(
        1,
        |t| Arc::new(HashLocator::new(t.nodes()).unwrap()),
        ClientConfig {
            mutate_timeout_ms: Some(20),
            ..ClientConfig::default()
        },
    );
    c.transport
        .set_behavior(NodeId(0), NodeBehavior::with_latency(Duration::from_millis(300)))
        .unwrap();

    let start = Instant::now();
    let r = c.client.mutate(Mutator::Incr, "n", 1, Some(1), 0).unwrap();
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(r.value, 0);
    assert_eq!(r.outcome, MutationOutcome::Unknown);
    assert_eq!(c.telemetry.counter("EVCACHE-MutateOperation-TIMEOUT"), 1);
}
