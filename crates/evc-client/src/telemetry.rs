use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use evc_types::{StatusCode, StoreType};
use tracing::trace;

/// Sink for client metrics.
pub trait Telemetry: Send + Sync {
    fn record_duration(&self, name: &str, elapsed: Duration);

    fn increment(&self, name: &str);

    fn record_size(&self, name: &str, bytes: usize);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_duration(&self, _name: &str, _elapsed: Duration) {}

    fn increment(&self, _name: &str) {}

    fn record_size(&self, _name: &str, _bytes: usize) {}
}

/// Emits every measurement as a `trace` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record_duration(&self, name: &str, elapsed: Duration) {
        trace!(metric = name, micros = elapsed.as_micros() as u64, "duration");
    }

    fn increment(&self, name: &str) {
        trace!(metric = name, "counter");
    }

    fn record_size(&self, name: &str, bytes: usize) {
        trace!(metric = name, bytes, "size");
    }
}

/// Keeps counts in memory; used by tests and the CLI's summary output.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    counters: DashMap<String, u64>,
    durations: DashMap<String, u64>,
    sizes: DashMap<String, Vec<usize>>,
}

impl InMemoryTelemetry {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of counter `name`, `0` if never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |v| *v)
    }

    /// How many durations were recorded under `name`.
    pub fn duration_count(&self, name: &str) -> u64 {
        self.durations.get(name).map_or(0, |v| *v)
    }

    /// Every size recorded under `name`, in arrival order.
    pub fn sizes(&self, name: &str) -> Vec<usize> {
        self.sizes.get(name).map(|v| v.clone()).unwrap_or_default()
    }

    /// Every counter, sorted by name.
    pub fn counters(&self) -> Vec<(String, u64)> {
        let mut all: Vec<_> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort();
        all
    }
}

impl Telemetry for InMemoryTelemetry {
    fn record_duration(&self, name: &str, _elapsed: Duration) {
        *self.durations.entry(name.to_string()).or_insert(0) += 1;
    }

    fn increment(&self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    fn record_size(&self, name: &str, bytes: usize) {
        self.sizes.entry(name.to_string()).or_default().push(bytes);
    }
}

const CODES: [StatusCode; 6] = [
    StatusCode::Success,
    StatusCode::NotFound,
    StatusCode::AlreadyExists,
    StatusCode::TimedOut,
    StatusCode::Cancelled,
    StatusCode::BackendError,
];

fn code_index(code: StatusCode) -> usize {
    match code {
        StatusCode::Success => 0,
        StatusCode::NotFound => 1,
        StatusCode::AlreadyExists => 2,
        StatusCode::TimedOut => 3,
        StatusCode::Cancelled => 4,
        StatusCode::BackendError => 5,
    }
}

/// Names for one operation type: its timer, its payload-size summary and one
/// counter per status code.
#[derive(Debug)]
pub struct OpMetrics {
    pub duration: String,
    pub data_size: String,
    by_code: [String; 6],
}

impl OpMetrics {
    fn new(app: &str, op: &str, size_name: &str) -> Self {
        Self {
            duration: format!("{app}-{op}"),
            data_size: format!("{app}-{size_name}-DataSize"),
            by_code: CODES.map(|c| format!("{app}-{op}-{}", c.as_str())),
        }
    }

    /// Counter name for a terminal status code.
    pub fn counter(&self, code: StatusCode) -> &str {
        &self.by_code[code_index(code)]
    }
}

/// Success and failure counters for one append-or-add phase.
#[derive(Debug)]
pub struct PhaseMetrics {
    pub success: String,
    pub fail: String,
}

impl PhaseMetrics {
    fn new(app: &str, phase: &str) -> Self {
        Self {
            success: format!("{app}-AoA-{phase}Operation-SUCCESS"),
            fail: format!("{app}-AoA-{phase}Operation-FAIL"),
        }
    }
}

/// Every metric name the client emits, built once per client around the
/// injected sink.
pub struct Metrics {
    sink: Arc<dyn Telemetry>,
    pub get: OpMetrics,
    pub get_and_touch: OpMetrics,
    pub bulk: OpMetrics,
    pub set: OpMetrics,
    pub add: OpMetrics,
    pub replace: OpMetrics,
    pub delete: OpMetrics,
    pub touch: OpMetrics,
    pub aoa: String,
    pub aoa_append: PhaseMetrics,
    pub aoa_add: PhaseMetrics,
    pub aoa_retry_append: PhaseMetrics,
    pub incr: String,
    pub decr: String,
    pub mutate_timeout: String,
}

impl Metrics {
    /// Build every metric name for `app` once.
    pub fn new(app: &str, sink: Arc<dyn Telemetry>) -> Self {
        Self {
            sink,
            get: OpMetrics::new(app, "GetOperation", "GetOperation"),
            get_and_touch: OpMetrics::new(app, "GetAndTouchOperation", "GATOperation"),
            bulk: OpMetrics::new(app, "BulkOperation", "BulkOperation"),
            set: OpMetrics::new(app, "SetOperation", "SetOperation"),
            add: OpMetrics::new(app, "AddOperation", "AddOperation"),
            replace: OpMetrics::new(app, "ReplaceOperation", "ReplaceOperation"),
            delete: OpMetrics::new(app, "DeleteOperation", "DeleteOperation"),
            touch: OpMetrics::new(app, "TouchOperation", "TouchOperation"),
            aoa: format!("{app}-AoAOperation"),
            aoa_append: PhaseMetrics::new(app, "Append"),
            aoa_add: PhaseMetrics::new(app, "Add"),
            aoa_retry_append: PhaseMetrics::new(app, "RetryAppend"),
            incr: format!("{app}-IncrOperation"),
            decr: format!("{app}-DecrOperation"),
            mutate_timeout: format!("{app}-MutateOperation-TIMEOUT"),
        }
    }

    /// Metrics for a store of `store_type`.
    pub fn store(&self, store_type: StoreType) -> &OpMetrics {
        match store_type {
            StoreType::Set => &self.set,
            StoreType::Add => &self.add,
            StoreType::Replace => &self.replace,
        }
    }

    /// Record an operation's duration and its status counter.
    pub fn completed(&self, op: &OpMetrics, elapsed: Duration, code: StatusCode) {
        self.sink.record_duration(&op.duration, elapsed);
        self.sink.increment(op.counter(code));
    }

    /// Record the size of a returned payload.
    pub fn data_size(&self, op: &OpMetrics, bytes: usize) {
        self.sink.record_size(&op.data_size, bytes);
    }

    /// Record a duration under `name`.
    pub fn duration(&self, name: &str, elapsed: Duration) {
        self.sink.record_duration(name, elapsed);
    }

    /// Increment counter `name`.
    pub fn increment(&self, name: &str) {
        self.sink.increment(name);
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("get", &self.get.duration).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_app_prefix() {
        let m = Metrics::new("MOVIES", Arc::new(NoopTelemetry));
        assert_eq!(m.get.duration, "MOVIES-GetOperation");
        assert_eq!(m.get.data_size, "MOVIES-GetOperation-DataSize");
        assert_eq!(m.get_and_touch.data_size, "MOVIES-GATOperation-DataSize");
        assert_eq!(m.set.counter(StatusCode::TimedOut), "MOVIES-SetOperation-TIMEDOUT");
        assert_eq!(m.store(StoreType::Add).duration, "MOVIES-AddOperation");
        assert_eq!(m.aoa_retry_append.fail, "MOVIES-AoA-RetryAppendOperation-FAIL");
        assert_eq!(m.mutate_timeout, "MOVIES-MutateOperation-TIMEOUT");
    }

    #[test]
    fn every_code_has_a_counter() {
        let m = Metrics::new("A", Arc::new(NoopTelemetry));
        for code in CODES {
            assert!(m.delete.counter(code).ends_with(code.as_str()));
        }
    }

    #[test]
    fn in_memory_sink_counts() {
        let sink = Arc::new(InMemoryTelemetry::new());
        let m = Metrics::new("A", sink.clone());
        m.completed(&m.touch, Duration::from_millis(1), StatusCode::Success);
        m.completed(&m.touch, Duration::from_millis(1), StatusCode::NotFound);
        m.data_size(&m.get, 42);

        assert_eq!(sink.counter("A-TouchOperation-SUCCESS"), 1);
        assert_eq!(sink.counter("A-TouchOperation-ERR_NOT_FOUND"), 1);
        assert_eq!(sink.duration_count("A-TouchOperation"), 2);
        assert_eq!(sink.sizes("A-GetOperation-DataSize"), vec![42]);
        assert_eq!(sink.counters().len(), 2);
    }
}
