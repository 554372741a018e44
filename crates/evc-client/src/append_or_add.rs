use std::fmt;
use std::sync::Arc;

use evc_ops::OperationFuture;
use evc_transport::{NodeRef, OperationCallback, Reply, Transport};
use evc_types::{CachedData, ConcatType, Operation, OperationKind, OperationStatus, StatusCode, StoreType};
use tracing::{debug, warn};

use crate::telemetry::{Metrics, PhaseMetrics};

/// Step of the append-or-add fallback.
///
/// ```text
/// AppendAttempt --ok--> Done
///       |fail
///       v
///   AddAttempt  --ok--> Done
///       |fail
///       v
///  RetryAppend  ------> Done
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppendOrAddPhase {
    AppendAttempt,
    AddAttempt,
    RetryAppend,
    Done,
}

impl AppendOrAddPhase {
    /// The phase after this one finished with `success`.
    pub fn next(self, success: bool) -> Self {
        match (self, success) {
            (_, true) | (Self::RetryAppend, false) | (Self::Done, false) => Self::Done,
            (Self::AppendAttempt, false) => Self::AddAttempt,
            (Self::AddAttempt, false) => Self::RetryAppend,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AppendAttempt => "Append",
            Self::AddAttempt => "Add",
            Self::RetryAppend => "RetryAppend",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for AppendOrAddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// "Append if present, else add, else append again" for one key.
///
/// The coordinator is moved into the callback of whichever phase is in
/// flight and handed back by [`advance`](Self::advance), so only one phase is
/// ever outstanding and no callback nests another.
pub(crate) struct AppendOrAdd {
    key: String,
    data: CachedData,
    exp: u32,
    node: NodeRef,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
    future: OperationFuture<bool>,
    phase: AppendOrAddPhase,
}

impl AppendOrAdd {
    pub(crate) fn new(
        key: String,
        data: CachedData,
        exp: u32,
        node: NodeRef,
        transport: Arc<dyn Transport>,
        metrics: Arc<Metrics>,
        future: OperationFuture<bool>,
    ) -> Self {
        Self {
            key,
            data,
            exp,
            node,
            transport,
            metrics,
            future,
            phase: AppendOrAddPhase::AppendAttempt,
        }
    }

    pub(crate) fn start(self) {
        self.submit();
    }

    fn operation(&self) -> Operation {
        let kind = match self.phase {
            AppendOrAddPhase::AddAttempt => OperationKind::Store {
                store_type: StoreType::Add,
                key: self.key.clone(),
                flags: self.data.flags,
                exp: self.exp,
                data: self.data.data.clone(),
            },
            _ => OperationKind::Concat {
                concat_type: ConcatType::Append,
                key: self.key.clone(),
                data: self.data.data.clone(),
            },
        };
        Operation::new(kind)
    }

    fn submit(self) {
        let operation = self.operation();
        let node = self.node.clone();
        let transport = self.transport.clone();
        transport.submit(
            &node,
            operation,
            Box::new(PhaseCallback {
                coordinator: self,
                cas: None,
            }),
        );
    }

    fn phase_metrics(&self) -> Option<&PhaseMetrics> {
        match self.phase {
            AppendOrAddPhase::AppendAttempt => Some(&self.metrics.aoa_append),
            AppendOrAddPhase::AddAttempt => Some(&self.metrics.aoa_add),
            AppendOrAddPhase::RetryAppend => Some(&self.metrics.aoa_retry_append),
            AppendOrAddPhase::Done => None,
        }
    }

    /// Consume the in-flight phase's outcome: either settle the future or
    /// submit the next phase.
    fn advance(mut self, status: OperationStatus, cas: Option<u64>) {
        let success = status.is_success();
        if let Some(m) = self.phase_metrics() {
            self.metrics
                .increment(if success { &m.success } else { &m.fail });
        }
        debug!(
            key = %self.key,
            phase = %self.phase,
            status = %status.code(),
            "append-or-add phase finished"
        );

        if self.phase == AppendOrAddPhase::AddAttempt {
            if let Some(cas) = cas {
                self.future.set_cas(cas);
            }
        }

        let next = self.phase.next(success);
        if next == AppendOrAddPhase::Done {
            self.metrics.duration(&self.metrics.aoa, self.future.elapsed());
            self.future.complete(Some(success), status);
            return;
        }

        if matches!(status.code(), StatusCode::TimedOut | StatusCode::BackendError) {
            warn!(
                key = %self.key,
                phase = %self.phase,
                status = %status,
                "append-or-add phase failed, falling back"
            );
        }
        self.phase = next;
        self.submit();
    }
}

struct PhaseCallback {
    coordinator: AppendOrAdd,
    cas: Option<u64>,
}

impl OperationCallback for PhaseCallback {
    fn received(&mut self, reply: Reply) {
        if let Reply::Cas { cas, .. } = reply {
            self.cas = Some(cas);
        }
    }

    fn completed(self: Box<Self>, status: OperationStatus) {
        let PhaseCallback { coordinator, cas } = *self;
        coordinator.advance(status, cas);
    }
}
