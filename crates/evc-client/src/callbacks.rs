use std::sync::Arc;

use evc_codec::Transcoder;
use evc_ops::{BulkGetFuture, OperationFuture};
use evc_transport::{OperationCallback, Reply};
use evc_types::{CachedData, CasValue, OperationStatus, StatusCode, StoreType};
use tracing::{debug, error, warn};

use crate::telemetry::{Metrics, OpMetrics};

/// Which single-key read a [`ValueCallback`] serves.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ReadOp {
    Get,
    GetAndTouch,
}

impl ReadOp {
    fn metrics(self, metrics: &Metrics) -> &OpMetrics {
        match self {
            Self::Get => &metrics.get,
            Self::GetAndTouch => &metrics.get_and_touch,
        }
    }
}

/// Which write a [`WriteCallback`] serves.
#[derive(Clone, Copy, Debug)]
pub(crate) enum WriteOp {
    Store(StoreType),
    Delete,
    Touch,
}

impl WriteOp {
    fn metrics(self, metrics: &Metrics) -> &OpMetrics {
        match self {
            Self::Store(store_type) => metrics.store(store_type),
            Self::Delete => &metrics.delete,
            Self::Touch => &metrics.touch,
        }
    }
}

/// Decodes the payload of a single-key read into the future's value.
///
/// `wrap` builds the future's value from the CAS token and the decoded
/// payload, so one callback serves both `get` and `get_and_touch`.
pub(crate) struct ValueCallback<T, R, C> {
    pub(crate) key: String,
    pub(crate) op: ReadOp,
    pub(crate) future: OperationFuture<R>,
    pub(crate) tc: C,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) wrap: fn(u64, T) -> R,
    pub(crate) value: Option<R>,
}

impl<T, R, C> OperationCallback for ValueCallback<T, R, C>
where
    T: Send + 'static,
    R: Send + Sync + 'static,
    C: Transcoder<T> + 'static,
{
    fn received(&mut self, reply: Reply) {
        let Reply::Value {
            key,
            flags,
            cas,
            data,
        } = reply
        else {
            return;
        };
        if key != self.key {
            warn!(key = %self.key, returned = %key, "wrong key returned");
        }
        self.metrics.data_size(self.op.metrics(&self.metrics), data.len());
        if matches!(self.op, ReadOp::GetAndTouch) {
            self.future.set_cas(cas);
        }
        match self.tc.decode(&CachedData::new(flags, data)) {
            Ok(decoded) => self.value = Some((self.wrap)(cas, decoded)),
            Err(err) => {
                error!(key = %self.key, %err, "failed to decode value");
                self.future.set_decode_error(err);
            }
        }
    }

    fn completed(self: Box<Self>, status: OperationStatus) {
        let this = *self;
        this.metrics
            .completed(this.op.metrics(&this.metrics), this.future.elapsed(), status.code());
        debug!(key = %this.key, status = %status.code(), hit = this.value.is_some(), "read completed");
        this.future.complete(this.value, status);
    }
}

pub(crate) fn plain<T>(_cas: u64, value: T) -> T {
    value
}

pub(crate) fn with_cas<T>(cas: u64, value: T) -> CasValue<T> {
    CasValue::new(cas, value)
}

/// Merges one shard's chunk of a bulk get.
pub(crate) struct BulkCallback<T, C> {
    pub(crate) future: BulkGetFuture<T>,
    pub(crate) tc: Arc<C>,
    pub(crate) metrics: Arc<Metrics>,
}

impl<T, C> OperationCallback for BulkCallback<T, C>
where
    T: Send + Sync + 'static,
    C: Transcoder<T> + 'static,
{
    fn received(&mut self, reply: Reply) {
        let Reply::Value {
            key, flags, data, ..
        } = reply
        else {
            return;
        };
        self.metrics.data_size(&self.metrics.bulk, data.len());
        match self.tc.decode(&CachedData::new(flags, data)) {
            Ok(value) => self.future.insert(key, value),
            Err(err) => {
                error!(key = %key, %err, "failed to decode value in bulk get");
                self.future.record_decode_error(key, err);
            }
        }
    }

    fn completed(self: Box<Self>, status: OperationStatus) {
        self.metrics.duration(&self.metrics.bulk.duration, self.future.elapsed());
        if !status.is_success() {
            debug!(status = %status, "bulk chunk failed");
        }
        self.future.chunk_completed(status);
    }
}

/// Settles a write future with whether the node accepted the write.
pub(crate) struct WriteCallback {
    pub(crate) key: String,
    pub(crate) op: WriteOp,
    pub(crate) future: OperationFuture<bool>,
    pub(crate) metrics: Arc<Metrics>,
}

impl OperationCallback for WriteCallback {
    fn received(&mut self, reply: Reply) {
        if let Reply::Cas { cas, .. } = reply {
            self.future.set_cas(cas);
        }
    }

    fn completed(self: Box<Self>, status: OperationStatus) {
        self.metrics
            .completed(self.op.metrics(&self.metrics), self.future.elapsed(), status.code());
        if status.code() == StatusCode::TimedOut {
            warn!(key = %self.key, op = ?self.op, "write timed out");
        } else {
            debug!(key = %self.key, op = ?self.op, status = %status.code(), "write completed");
        }
        let success = status.is_success();
        self.future.complete(Some(success), status);
    }
}
