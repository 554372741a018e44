use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use evc_codec::CodecError;
use evc_types::OperationStatus;
use tokio::sync::Notify;

/// The settled outcome of one operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion<T> {
    value: Option<T>,
    status: OperationStatus,
    cas: Option<u64>,
    decode_error: Option<CodecError>,
}

impl<T> Completion<T> {
    /// The result value. A payload that came back but could not be decoded is
    /// an error here, never a silent `None`.
    pub fn value(&self) -> Result<Option<&T>, CodecError> {
        match &self.decode_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.value.as_ref()),
        }
    }

    /// The terminal status.
    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    /// Whether the terminal status is a success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// CAS token reported during the data phase, if any.
    pub fn cas(&self) -> Option<u64> {
        self.cas
    }

    /// Why the payload could not be decoded, if it could not.
    pub fn decode_error(&self) -> Option<&CodecError> {
        self.decode_error.as_ref()
    }
}

type Listener<T> = Box<dyn FnOnce(&Completion<T>) + Send>;

struct State<T> {
    completion: Option<Arc<Completion<T>>>,
    cas: Option<u64>,
    decode_error: Option<CodecError>,
    listeners: Vec<Listener<T>>,
}

struct Inner<T> {
    key: String,
    start: Instant,
    timeout: Duration,
    state: Mutex<State<T>>,
    cond: Condvar,
    notify: Notify,
}

/// A single-assignment result holder for one cache operation.
///
/// Transport callbacks complete it from arbitrary threads; callers can poll,
/// block with a timeout, `.await`, or register listeners. The first call to
/// [`complete`](Self::complete) wins and every later one is a no-op.
///
/// Cloning is cheap and yields another handle to the same future.
pub struct OperationFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for OperationFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> OperationFuture<T> {
    /// A pending future for `key`. `timeout` is the default bound used by
    /// [`wait`](Self::wait).
    pub fn new(key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: key.into(),
                start: Instant::now(),
                timeout,
                state: Mutex::new(State {
                    completion: None,
                    cas: None,
                    decode_error: None,
                    listeners: Vec::new(),
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// A future that is already settled.
    pub fn resolved(
        key: impl Into<String>,
        timeout: Duration,
        value: Option<T>,
        status: OperationStatus,
    ) -> Self {
        let future = Self::new(key, timeout);
        future.complete(value, status);
        future
    }

    /// Key the operation targets.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Default bound for [`wait`](Self::wait).
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// When the operation was created.
    pub fn start(&self) -> Instant {
        self.inner.start
    }

    /// Time since [`start`](Self::start).
    pub fn elapsed(&self) -> Duration {
        self.inner.start.elapsed()
    }

    /// Record the CAS token from a data notification. Ignored once complete.
    pub fn set_cas(&self, cas: u64) {
        let mut state = self.inner.state.lock().expect("future lock poisoned");
        if state.completion.is_none() {
            state.cas = Some(cas);
        }
    }

    /// Record a payload decode failure. Ignored once complete.
    pub fn set_decode_error(&self, err: CodecError) {
        let mut state = self.inner.state.lock().expect("future lock poisoned");
        if state.completion.is_none() {
            state.decode_error = Some(err);
        }
    }

    /// Settle the future. Returns `false`, leaving the stored outcome
    /// untouched, if it was already settled.
    ///
    /// Blocked and async waiters are released before listeners run; listeners
    /// run on this thread, outside the internal lock.
    pub fn complete(&self, value: Option<T>, status: OperationStatus) -> bool {
        let (completion, listeners) = {
            let mut state = self.inner.state.lock().expect("future lock poisoned");
            if state.completion.is_some() {
                return false;
            }
            let completion = Arc::new(Completion {
                value,
                status,
                cas: state.cas,
                decode_error: state.decode_error.take(),
            });
            state.completion = Some(completion.clone());
            (completion, std::mem::take(&mut state.listeners))
        };
        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
        for listener in listeners {
            listener(&completion);
        }
        true
    }

    /// Settle locally as `Cancelled`. Nothing is sent to the node.
    pub fn cancel(&self) -> bool {
        self.complete(None, OperationStatus::cancelled())
    }

    /// Whether a completion has been recorded.
    pub fn is_done(&self) -> bool {
        self.inner
            .state
            .lock()
            .expect("future lock poisoned")
            .completion
            .is_some()
    }

    /// The outcome if settled, without blocking.
    pub fn poll(&self) -> Option<Arc<Completion<T>>> {
        self.inner
            .state
            .lock()
            .expect("future lock poisoned")
            .completion
            .clone()
    }

    /// Block up to the default timeout.
    pub fn wait(&self) -> Option<Arc<Completion<T>>> {
        self.wait_timeout(self.inner.timeout)
    }

    /// Block until settled or until `timeout` elapses. A timeout yields
    /// `None` and leaves the operation running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Completion<T>>> {
        let state = self.inner.state.lock().expect("future lock poisoned");
        let (state, _) = self
            .inner
            .cond
            .wait_timeout_while(state, timeout, |s| s.completion.is_none())
            .expect("future lock poisoned");
        state.completion.clone()
    }

    /// Suspend until settled.
    pub async fn completed(&self) -> Arc<Completion<T>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a completion between the
            // check and the await is not lost.
            notified.as_mut().enable();
            if let Some(completion) = self.poll() {
                return completion;
            }
            notified.await;
        }
    }

    /// Suspend until settled or until `timeout` elapses.
    pub async fn wait_async(&self, timeout: Duration) -> Option<Arc<Completion<T>>> {
        tokio::time::timeout(timeout, self.completed()).await.ok()
    }

    /// Run `listener` once the future settles. If it already has, the
    /// listener runs immediately on this thread.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Completion<T>) + Send + 'static,
    {
        let completion = {
            let mut state = self.inner.state.lock().expect("future lock poisoned");
            match &state.completion {
                Some(c) => c.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&completion);
    }
}

impl<T> fmt::Debug for OperationFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self
            .inner
            .state
            .lock()
            .map(|s| s.completion.as_ref().map(|c| c.status.code()))
            .unwrap_or(None);
        f.debug_struct("OperationFuture")
            .field("key", &self.inner.key)
            .field("status", &done)
            .finish()
    }
}
