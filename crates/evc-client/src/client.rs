use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use evc_codec::Transcoder;
use evc_ops::{BulkGetFuture, Completion, LatchPolicy, OperationFuture, WriteLatch};
use evc_transport::{NodeId, NodeLocator, NodeRef, OperationCallback, Transport};
use evc_types::{
    validate_key, CachedData, CasValue, Mutator, Operation, OperationKind, OperationStatus,
    StoreType,
};
use tracing::{debug, warn};

use crate::append_or_add::AppendOrAdd;
use crate::callbacks::{plain, with_cas, BulkCallback, ReadOp, ValueCallback, WriteCallback, WriteOp};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::mutate::{resolve, MutateCallback, MutationResult};
use crate::telemetry::{Metrics, Telemetry, TracingTelemetry};

/// Entry point for every cache operation.
///
/// Methods validate and encode on the calling thread, submit to the
/// transport, and return a future at once. Only the counter calls block.
pub struct CacheClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    locator: Arc<dyn NodeLocator>,
    metrics: Arc<Metrics>,
}

impl CacheClient {
    /// A client reporting metrics as `tracing` events.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        locator: Arc<dyn NodeLocator>,
    ) -> ClientResult<Self> {
        Self::with_telemetry(config, transport, locator, Arc::new(TracingTelemetry))
    }

    pub fn with_telemetry(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        locator: Arc<dyn NodeLocator>,
        telemetry: Arc<dyn Telemetry>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new(&config.app_name, telemetry));
        Ok(Self {
            config,
            transport,
            locator,
            metrics,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The node that owns `key`.
    pub fn node_for(&self, key: &str) -> Option<NodeRef> {
        self.locator.primary(key)
    }

    fn validate(&self, key: &str) -> ClientResult<()> {
        validate_key(key, self.config.binary_keys)?;
        Ok(())
    }

    fn no_node(key: &str) -> OperationStatus {
        OperationStatus::backend(format!("no node available for key {key}"))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch one key. The future's default wait is the read timeout.
    pub fn get<T, C>(&self, key: &str, tc: C) -> ClientResult<OperationFuture<T>>
    where
        T: Send + Sync + 'static,
        C: Transcoder<T> + 'static,
    {
        self.read(key, OperationKind::Get { key: key.to_string() }, ReadOp::Get, tc, plain)
    }

    /// [`get`](Self::get), with `listener` run on completion.
    pub fn get_with_listener<T, C, F>(
        &self,
        key: &str,
        tc: C,
        listener: F,
    ) -> ClientResult<OperationFuture<T>>
    where
        T: Send + Sync + 'static,
        C: Transcoder<T> + 'static,
        F: FnOnce(&Completion<T>) + Send + 'static,
    {
        let future = self.get(key, tc)?;
        future.add_listener(listener);
        Ok(future)
    }

    /// Fetch one key and reset its expiry to `exp` seconds.
    pub fn get_and_touch<T, C>(
        &self,
        key: &str,
        exp: u32,
        tc: C,
    ) -> ClientResult<OperationFuture<CasValue<T>>>
    where
        T: Send + Sync + 'static,
        C: Transcoder<T> + 'static,
    {
        self.read(
            key,
            OperationKind::GetAndTouch {
                key: key.to_string(),
                exp,
            },
            ReadOp::GetAndTouch,
            tc,
            with_cas,
        )
    }

    fn read<T, R, C>(
        &self,
        key: &str,
        kind: OperationKind,
        op: ReadOp,
        tc: C,
        wrap: fn(u64, T) -> R,
    ) -> ClientResult<OperationFuture<R>>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
        C: Transcoder<T> + 'static,
    {
        self.validate(key)?;
        let future = OperationFuture::new(key, self.config.read_timeout());
        let Some(node) = self.locator.primary(key) else {
            future.complete(None, Self::no_node(key));
            return Ok(future);
        };
        let operation = Operation::new(kind);
        debug!(key, op = operation.name(), node = %node.id(), "submitting read");
        self.transport.submit(
            &node,
            operation,
            Box::new(ValueCallback {
                key: key.to_string(),
                op,
                future: future.clone(),
                tc,
                metrics: self.metrics.clone(),
                wrap,
                value: None,
            }),
        );
        Ok(future)
    }

    /// Fetch many keys with one request per owning shard.
    ///
    /// Keys owned by inactive nodes are skipped and simply absent from the
    /// result. With nothing to fetch the future is already complete.
    pub fn get_bulk<T, C, K>(
        &self,
        keys: impl IntoIterator<Item = K>,
        tc: C,
    ) -> ClientResult<BulkGetFuture<T>>
    where
        T: Send + Sync + 'static,
        C: Transcoder<T> + 'static,
        K: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut chunks: BTreeMap<NodeId, (NodeRef, Vec<String>)> = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            self.validate(key)?;
            if !seen.insert(key.to_string()) {
                continue;
            }
            match self.locator.primary(key) {
                Some(node) if node.is_active() => {
                    chunks
                        .entry(node.id())
                        .or_insert_with(|| (node.clone(), Vec::new()))
                        .1
                        .push(key.to_string());
                }
                Some(node) => debug!(key, node = %node.id(), "skipping key on inactive node"),
                None => debug!(key, "skipping key with no node"),
            }
        }

        let future = BulkGetFuture::new(chunks.len(), self.config.read_timeout());
        let tc = Arc::new(tc);
        for (node, keys) in chunks.into_values() {
            debug!(node = %node.id(), keys = keys.len(), "submitting bulk chunk");
            self.transport.submit(
                &node,
                Operation::new(OperationKind::GetBulk { keys }),
                Box::new(BulkCallback {
                    future: future.clone(),
                    tc: tc.clone(),
                    metrics: self.metrics.clone(),
                }),
            );
        }
        Ok(future)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn set<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>>
    where
        C: Transcoder<T>,
    {
        self.store_data(StoreType::Set, key, exp, tc.encode(value)?, latch)
    }

    pub fn add<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>>
    where
        C: Transcoder<T>,
    {
        self.store_data(StoreType::Add, key, exp, tc.encode(value)?, latch)
    }

    pub fn replace<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>>
    where
        C: Transcoder<T>,
    {
        self.store_data(StoreType::Replace, key, exp, tc.encode(value)?, latch)
    }

    /// Store already-encoded data on the key's primary node.
    pub fn store_data(
        &self,
        store_type: StoreType,
        key: &str,
        exp: u32,
        data: CachedData,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>> {
        self.validate(key)?;
        Ok(self.write(
            self.locator.primary(key),
            key,
            store_kind(store_type, key, exp, &data),
            WriteOp::Store(store_type),
            latch,
        ))
    }

    pub fn delete(&self, key: &str, latch: Option<&WriteLatch>) -> ClientResult<OperationFuture<bool>> {
        self.validate(key)?;
        Ok(self.write(
            self.locator.primary(key),
            key,
            OperationKind::Delete { key: key.to_string() },
            WriteOp::Delete,
            latch,
        ))
    }

    pub fn touch(
        &self,
        key: &str,
        exp: u32,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>> {
        self.validate(key)?;
        Ok(self.write(
            self.locator.primary(key),
            key,
            OperationKind::Touch {
                key: key.to_string(),
                exp,
            },
            WriteOp::Touch,
            latch,
        ))
    }

    fn register(&self, latch: Option<&WriteLatch>, future: &OperationFuture<bool>) {
        if let Some(latch) = latch {
            if !self.config.write_only {
                latch.register(future);
            }
        }
    }

    fn write(
        &self,
        node: Option<NodeRef>,
        key: &str,
        kind: OperationKind,
        op: WriteOp,
        latch: Option<&WriteLatch>,
    ) -> OperationFuture<bool> {
        let future = OperationFuture::new(key, self.config.operation_timeout());
        self.register(latch, &future);
        let Some(node) = node else {
            future.complete(Some(false), Self::no_node(key));
            return future;
        };
        let operation = Operation::new(kind);
        debug!(key, op = operation.name(), node = %node.id(), "submitting write");
        self.transport.submit(
            &node,
            operation,
            Box::new(WriteCallback {
                key: key.to_string(),
                op,
                future: future.clone(),
                metrics: self.metrics.clone(),
            }),
        );
        future
    }

    // -----------------------------------------------------------------------
    // Replicated writes
    // -----------------------------------------------------------------------

    /// A latch expecting one write per replica of `key`.
    pub fn write_latch(&self, key: &str, policy: LatchPolicy) -> WriteLatch {
        WriteLatch::new(policy, self.locator.replicas(key).len())
    }

    fn replicate<F>(
        &self,
        key: &str,
        op: WriteOp,
        latch: &WriteLatch,
        kind: F,
    ) -> ClientResult<Vec<OperationFuture<bool>>>
    where
        F: Fn() -> OperationKind,
    {
        self.validate(key)?;
        let replicas = self.locator.replicas(key);
        if replicas.is_empty() {
            return Ok(vec![self.write(None, key, kind(), op, Some(latch))]);
        }
        Ok(replicas
            .into_iter()
            .map(|node| self.write(Some(node), key, kind(), op, Some(latch)))
            .collect())
    }

    /// Store already-encoded data on every replica of `key`, registering
    /// each write with `latch`.
    pub fn store_data_replicated(
        &self,
        store_type: StoreType,
        key: &str,
        exp: u32,
        data: CachedData,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>> {
        self.replicate(key, WriteOp::Store(store_type), latch, || {
            store_kind(store_type, key, exp, &data)
        })
    }

    pub fn set_replicated<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>>
    where
        C: Transcoder<T>,
    {
        self.store_data_replicated(StoreType::Set, key, exp, tc.encode(value)?, latch)
    }

    pub fn add_replicated<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>>
    where
        C: Transcoder<T>,
    {
        self.store_data_replicated(StoreType::Add, key, exp, tc.encode(value)?, latch)
    }

    pub fn replace_replicated<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>>
    where
        C: Transcoder<T>,
    {
        self.store_data_replicated(StoreType::Replace, key, exp, tc.encode(value)?, latch)
    }

    pub fn delete_replicated(
        &self,
        key: &str,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>> {
        self.replicate(key, WriteOp::Delete, latch, || OperationKind::Delete {
            key: key.to_string(),
        })
    }

    pub fn touch_replicated(
        &self,
        key: &str,
        exp: u32,
        latch: &WriteLatch,
    ) -> ClientResult<Vec<OperationFuture<bool>>> {
        self.replicate(key, WriteOp::Touch, latch, || OperationKind::Touch {
            key: key.to_string(),
            exp,
        })
    }

    // -----------------------------------------------------------------------
    // Append-or-add
    // -----------------------------------------------------------------------

    /// Append `value` to `key`, creating the key if it is missing.
    pub fn append_or_add<T, C>(
        &self,
        key: &str,
        exp: u32,
        value: &T,
        tc: &C,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>>
    where
        C: Transcoder<T>,
    {
        self.append_or_add_data(key, exp, tc.encode(value)?, latch)
    }

    /// Append already-encoded data, falling back to add and then to a second
    /// append if another writer creates the key in between. At most three
    /// operations are issued; the future carries the last one's status.
    pub fn append_or_add_data(
        &self,
        key: &str,
        exp: u32,
        data: CachedData,
        latch: Option<&WriteLatch>,
    ) -> ClientResult<OperationFuture<bool>> {
        self.validate(key)?;
        let future = OperationFuture::new(key, self.config.operation_timeout());
        self.register(latch, &future);
        let Some(node) = self.locator.primary(key) else {
            future.complete(Some(false), Self::no_node(key));
            return Ok(future);
        };
        debug!(key, node = %node.id(), "starting append-or-add");
        AppendOrAdd::new(
            key.to_string(),
            data,
            exp,
            node,
            self.transport.clone(),
            self.metrics.clone(),
            future.clone(),
        )
        .start();
        Ok(future)
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Increment a counter and return its new value, `-1` if the node
    /// refused, or `0` if no answer arrived within the mutate timeout.
    ///
    /// Blocks the calling thread; do not call from an async runtime worker.
    pub fn incr(&self, key: &str, by: u64, default: Option<u64>, exp: u32) -> ClientResult<i64> {
        let result = self.mutate(Mutator::Incr, key, by, default, exp)?;
        debug!(key, by, ?default, exp, value = result.value, "increment");
        Ok(result.value)
    }

    /// Decrement a counter; see [`incr`](Self::incr). Counters never go
    /// below zero.
    pub fn decr(&self, key: &str, by: u64, default: Option<u64>, exp: u32) -> ClientResult<i64> {
        let result = self.mutate(Mutator::Decr, key, by, default, exp)?;
        debug!(key, by, ?default, exp, value = result.value, "decrement");
        Ok(result.value)
    }

    /// Apply a counter mutation, blocking up to the mutate timeout.
    ///
    /// A timeout is not an error: the result carries the best-known value
    /// and [`MutationOutcome::Unknown`](crate::MutationOutcome::Unknown).
    pub fn mutate(
        &self,
        mutator: Mutator,
        key: &str,
        by: u64,
        default: Option<u64>,
        exp: u32,
    ) -> ClientResult<MutationResult> {
        self.validate(key)?;
        let recorded = Arc::new(AtomicI64::new(0));
        let signal = OperationFuture::new(key, self.config.mutate_timeout());

        match self.locator.primary(key) {
            Some(node) => {
                self.transport.submit(
                    &node,
                    Operation::new(OperationKind::Mutate {
                        mutator,
                        key: key.to_string(),
                        by,
                        default,
                        exp,
                    }),
                    Box::new(MutateCallback::new(recorded.clone(), signal.clone())),
                );
            }
            None => {
                let callback = Box::new(MutateCallback::new(recorded.clone(), signal.clone()));
                callback.completed(Self::no_node(key));
            }
        }

        let completion = signal.wait();
        let result = resolve(&recorded, completion.as_deref());
        let timer = match mutator {
            Mutator::Incr => &self.metrics.incr,
            Mutator::Decr => &self.metrics.decr,
        };
        self.metrics.duration(timer, signal.elapsed());
        if completion.is_none() {
            warn!(
                key,
                op = mutator.name(),
                timeout_ms = self.config.mutate_timeout().as_millis() as u64,
                value = result.value,
                "counter mutation timed out"
            );
            self.metrics.increment(&self.metrics.mutate_timeout);
        }
        Ok(result)
    }
}

fn store_kind(store_type: StoreType, key: &str, exp: u32, data: &CachedData) -> OperationKind {
    OperationKind::Store {
        store_type,
        key: key.to_string(),
        flags: data.flags,
        exp,
        data: data.data.clone(),
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("app_name", &self.config.app_name)
            .field("nodes", &self.locator.nodes().len())
            .finish()
    }
}
