use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use evc_codec::CodecError;
use evc_types::OperationStatus;
use tracing::warn;

use crate::future::{Completion, OperationFuture};

/// The merged outcome of a bulk get.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkResult<T> {
    values: HashMap<String, T>,
    decode_errors: HashMap<String, CodecError>,
    status: OperationStatus,
    chunks: usize,
    failed_chunks: usize,
}

impl<T> BulkResult<T> {
    /// Decoded value for `key`, if it came back.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.values.get(key)
    }

    /// Every decoded value by key.
    pub fn values(&self) -> &HashMap<String, T> {
        &self.values
    }

    /// Take the decoded values.
    pub fn into_values(self) -> HashMap<String, T> {
        self.values
    }

    /// Keys whose payload came back but could not be decoded.
    pub fn decode_errors(&self) -> &HashMap<String, CodecError> {
        &self.decode_errors
    }

    /// The status of whichever shard reported last.
    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    /// Number of keys decoded.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no key was decoded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of shard chunks the request fanned out to.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Chunks whose terminal status was not a success.
    pub fn failed_chunks(&self) -> usize {
        self.failed_chunks
    }
}

struct Inner<T> {
    values: DashMap<String, T>,
    decode_errors: DashMap<String, CodecError>,
    chunks: usize,
    pending: AtomicUsize,
    failed: AtomicUsize,
    last_status: Mutex<Option<OperationStatus>>,
    done: OperationFuture<Arc<BulkResult<T>>>,
}

/// Fan-in point for a multi-key get split into per-shard chunks.
///
/// Each chunk's callback inserts its decoded values, then reports its
/// terminal status through [`chunk_completed`](Self::chunk_completed). The
/// report that takes the pending counter to zero seals the result and settles
/// the future; it happens exactly once however the chunks interleave.
pub struct BulkGetFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BulkGetFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> BulkGetFuture<T> {
    /// A future awaiting `chunks` shard reports. With zero chunks it is
    /// already complete with an empty result and `Success`.
    pub fn new(chunks: usize, timeout: Duration) -> Self {
        let future = Self {
            inner: Arc::new(Inner {
                values: DashMap::new(),
                decode_errors: DashMap::new(),
                chunks,
                pending: AtomicUsize::new(chunks),
                failed: AtomicUsize::new(0),
                last_status: Mutex::new(None),
                done: OperationFuture::new("bulk", timeout),
            }),
        };
        if chunks == 0 {
            future.finish();
        }
        future
    }

    /// Merge one decoded value. Shards own disjoint keys.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.inner.values.insert(key.into(), value);
    }

    /// Record that `key` came back but failed to decode.
    pub fn record_decode_error(&self, key: impl Into<String>, err: CodecError) {
        self.inner.decode_errors.insert(key.into(), err);
    }

    /// Report one chunk's terminal status. Returns `true` for the report
    /// that completed the whole request.
    pub fn chunk_completed(&self, status: OperationStatus) -> bool {
        if !status.is_success() {
            self.inner.failed.fetch_add(1, Ordering::AcqRel);
        }
        *self
            .inner
            .last_status
            .lock()
            .expect("bulk status lock poisoned") = Some(status);

        match self
            .inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => {
                self.finish();
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!(chunks = self.inner.chunks, "chunk reported after bulk get finished");
                false
            }
        }
    }

    fn finish(&self) {
        let keys: Vec<String> = self.inner.values.iter().map(|e| e.key().clone()).collect();
        let values: HashMap<String, T> = keys
            .into_iter()
            .filter_map(|k| self.inner.values.remove(&k))
            .collect();
        let decode_errors: HashMap<String, CodecError> = self
            .inner
            .decode_errors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let status = self
            .inner
            .last_status
            .lock()
            .expect("bulk status lock poisoned")
            .clone()
            .unwrap_or_else(OperationStatus::success);

        let result = Arc::new(BulkResult {
            values,
            decode_errors,
            status: status.clone(),
            chunks: self.inner.chunks,
            failed_chunks: self.inner.failed.load(Ordering::Acquire),
        });
        self.inner.done.complete(Some(result), status);
    }

    /// Chunks that have not reported yet.
    pub fn pending_chunks(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Chunks the request fanned out to.
    pub fn total_chunks(&self) -> usize {
        self.inner.chunks
    }

    /// Whether every chunk has reported.
    pub fn is_done(&self) -> bool {
        self.inner.done.is_done()
    }

    /// When the bulk request was created.
    pub fn start(&self) -> Instant {
        self.inner.done.start()
    }

    /// Time since [`start`](Self::start).
    pub fn elapsed(&self) -> Duration {
        self.inner.done.elapsed()
    }

    /// The merged result if complete, without blocking.
    pub fn poll(&self) -> Option<Arc<BulkResult<T>>> {
        self.inner.done.poll().and_then(|c| result_of(&c))
    }

    /// Block up to the read timeout.
    pub fn wait(&self) -> Option<Arc<BulkResult<T>>> {
        self.inner.done.wait().and_then(|c| result_of(&c))
    }

    /// Block up to `timeout`. `None` on timeout; shards keep running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<BulkResult<T>>> {
        self.inner.done.wait_timeout(timeout).and_then(|c| result_of(&c))
    }

    /// Suspend until complete or until `timeout` elapses.
    pub async fn wait_async(&self, timeout: Duration) -> Option<Arc<BulkResult<T>>> {
        self.inner
            .done
            .wait_async(timeout)
            .await
            .and_then(|c| result_of(&c))
    }

    /// Suspend until every chunk has reported.
    pub async fn completed(&self) -> Arc<BulkResult<T>> {
        let completion = self.inner.done.completed().await;
        result_of(&completion).expect("bulk completion always carries a result")
    }

    /// Run `listener` with the merged result once every chunk has reported.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&BulkResult<T>) + Send + 'static,
    {
        self.inner.done.add_listener(move |c| {
            if let Some(result) = result_of(c) {
                listener(&result);
            }
        });
    }
}

impl<T: Clone + Send + Sync + 'static> BulkGetFuture<T> {
    /// Values merged so far. Once complete, the full result.
    pub fn partial(&self) -> HashMap<String, T> {
        if let Some(result) = self.poll() {
            return result.values.clone();
        }
        self.inner
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

fn result_of<T>(completion: &Completion<Arc<BulkResult<T>>>) -> Option<Arc<BulkResult<T>>> {
    completion.value().ok().flatten().cloned()
}

impl<T> std::fmt::Debug for BulkGetFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkGetFuture")
            .field("chunks", &self.inner.chunks)
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish()
    }
}
