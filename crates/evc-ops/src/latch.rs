use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::future::OperationFuture;

/// How many replica acknowledgments a write needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchPolicy {
    None,
    One,
    Quorum,
    AllMinusOne,
    #[default]
    All,
}

impl LatchPolicy {
    /// Acknowledgments required out of `total` writes.
    pub fn required(self, total: usize) -> usize {
        match self {
            Self::None => 0,
            Self::One => total.min(1),
            Self::Quorum => {
                if total == 0 {
                    0
                } else {
                    total / 2 + 1
                }
            }
            Self::AllMinusOne => total.saturating_sub(1).max(total.min(1)),
            Self::All => total,
        }
    }
}

/// Point-in-time counts of a [`WriteLatch`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatchCounts {
    pub expected: usize,
    pub registered: usize,
    pub completed: usize,
    pub succeeded: usize,
}

impl LatchCounts {
    /// Writes that completed without success.
    pub fn failed(&self) -> usize {
        self.completed - self.succeeded
    }

    /// Registered writes still in flight.
    pub fn pending(&self) -> usize {
        self.registered - self.completed
    }
}

#[derive(Default)]
struct LatchState {
    futures: Vec<OperationFuture<bool>>,
    completed: usize,
    succeeded: usize,
}

struct Inner {
    policy: LatchPolicy,
    expected: usize,
    state: Mutex<LatchState>,
    cond: Condvar,
    notify: Notify,
}

impl Inner {
    fn counts(&self, state: &LatchState) -> LatchCounts {
        LatchCounts {
            expected: self.expected,
            registered: state.futures.len(),
            completed: state.completed,
            succeeded: state.succeeded,
        }
    }

    fn record(&self, success: bool) {
        {
            let mut state = self.state.lock().expect("latch lock poisoned");
            state.completed += 1;
            if success {
                state.succeeded += 1;
            }
        }
        self.cond.notify_all();
        self.notify.notify_waiters();
    }
}

/// Tracks the writes issued against a key's replicas.
///
/// Each write registers its future; waits unblock once enough of them have
/// completed. Waiting never cancels the stragglers.
#[derive(Clone)]
pub struct WriteLatch {
    inner: Arc<Inner>,
}

impl WriteLatch {
    /// A latch expecting `expected` writes, judged by `policy`.
    pub fn new(policy: LatchPolicy, expected: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                expected,
                state: Mutex::new(LatchState::default()),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// The policy [`await_policy`](Self::await_policy) judges by.
    pub fn policy(&self) -> LatchPolicy {
        self.inner.policy
    }

    /// Successful writes the policy requires.
    pub fn required(&self) -> usize {
        self.inner.policy.required(self.inner.expected)
    }

    /// Add a write's future. The slot is taken under the latch lock before
    /// the completion listener is attached, and a listener on an already
    /// settled future runs at once, so a racing completion is never missed.
    pub fn register(&self, future: &OperationFuture<bool>) {
        self.inner
            .state
            .lock()
            .expect("latch lock poisoned")
            .futures
            .push(future.clone());

        let latch: Weak<Inner> = Arc::downgrade(&self.inner);
        future.add_listener(move |completion| {
            if let Some(inner) = latch.upgrade() {
                inner.record(completion.is_success());
            }
        });
        debug!(key = future.key(), "write registered with latch");
    }

    /// Every registered write, in registration order.
    pub fn futures(&self) -> Vec<OperationFuture<bool>> {
        self.inner
            .state
            .lock()
            .expect("latch lock poisoned")
            .futures
            .clone()
    }

    /// Snapshot of all counters taken under one lock.
    pub fn counts(&self) -> LatchCounts {
        let state = self.inner.state.lock().expect("latch lock poisoned");
        self.inner.counts(&state)
    }

    /// Writes the latch was built to expect.
    pub fn expected_count(&self) -> usize {
        self.inner.expected
    }

    /// Writes registered so far.
    pub fn registered_count(&self) -> usize {
        self.counts().registered
    }

    /// Registered writes that have completed, successful or not.
    pub fn completed_count(&self) -> usize {
        self.counts().completed
    }

    /// Completed writes the node accepted.
    pub fn success_count(&self) -> usize {
        self.counts().succeeded
    }

    /// Completed writes that failed.
    pub fn failure_count(&self) -> usize {
        self.counts().failed()
    }

    /// Registered writes not yet completed.
    pub fn pending_count(&self) -> usize {
        self.counts().pending()
    }

    // -----------------------------------------------------------------------
    // Blocking waits
    // -----------------------------------------------------------------------

    /// Block until every registered write has completed.
    pub fn await_all(&self, timeout: Duration) -> bool {
        let counts = self.block_until(timeout, all_done);
        all_done(&counts)
    }

    /// Block until `n` registered writes have completed, successful or not.
    ///
    /// Returns early with `false` once every expected write is registered
    /// and resolved short of `n`.
    pub fn await_quorum(&self, n: usize, timeout: Duration) -> bool {
        let counts = self.block_until(timeout, |c| quorum_settled(c, n));
        counts.completed >= n
    }

    /// Block until the policy's required successes arrive, or until enough
    /// writes have failed that they never can.
    pub fn await_policy(&self, timeout: Duration) -> bool {
        let required = self.required();
        let counts = self.block_until(timeout, |c| policy_settled(c, required));
        counts.succeeded >= required
    }

    fn block_until<F>(&self, timeout: Duration, done: F) -> LatchCounts
    where
        F: Fn(&LatchCounts) -> bool,
    {
        let state = self.inner.state.lock().expect("latch lock poisoned");
        let state: MutexGuard<'_, LatchState> = self
            .inner
            .cond
            .wait_timeout_while(state, timeout, |s| !done(&self.inner.counts(s)))
            .expect("latch lock poisoned")
            .0;
        self.inner.counts(&state)
    }

    // -----------------------------------------------------------------------
    // Async waits
    // -----------------------------------------------------------------------

    /// Async [`await_all`](Self::await_all).
    pub async fn await_all_async(&self, timeout: Duration) -> bool {
        all_done(&self.suspend_until(timeout, all_done).await)
    }

    /// Async [`await_quorum`](Self::await_quorum).
    pub async fn await_quorum_async(&self, n: usize, timeout: Duration) -> bool {
        self.suspend_until(timeout, |c| quorum_settled(c, n))
            .await
            .completed
            >= n
    }

    /// Async [`await_policy`](Self::await_policy).
    pub async fn await_policy_async(&self, timeout: Duration) -> bool {
        let required = self.required();
        let counts = self
            .suspend_until(timeout, |c| policy_settled(c, required))
            .await;
        counts.succeeded >= required
    }

    async fn suspend_until<F>(&self, timeout: Duration, done: F) -> LatchCounts
    where
        F: Fn(&LatchCounts) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if done(&self.counts()) {
                    return;
                }
                notified.await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.counts()
    }
}

fn all_done(counts: &LatchCounts) -> bool {
    counts.completed >= counts.registered
}

/// Every expected write is registered and resolved; counts can no longer grow.
fn resolved_all(counts: &LatchCounts) -> bool {
    counts.registered >= counts.expected && counts.completed >= counts.registered
}

fn quorum_settled(counts: &LatchCounts, n: usize) -> bool {
    counts.completed >= n || resolved_all(counts)
}

fn policy_settled(counts: &LatchCounts, required: usize) -> bool {
    let out_of_reach = counts.failed() > counts.expected.saturating_sub(required);
    counts.succeeded >= required || resolved_all(counts) || out_of_reach
}

impl std::fmt::Debug for WriteLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLatch")
            .field("policy", &self.inner.policy)
            .field("counts", &self.counts())
            .finish()
    }
}
