use std::sync::Mutex;

use evc_types::{Operation, OperationStatus};

use crate::callback::{OperationCallback, Reply};
use crate::node::{NodeId, NodeRef};
use crate::traits::{OperationHandle, Transport};

/// What a [`ScriptedTransport`] does with one submission.
#[derive(Clone, Debug)]
pub enum Script {
    /// Deliver these replies, then this status, on the submitting thread.
    Respond {
        replies: Vec<Reply>,
        status: OperationStatus,
    },
    /// Keep the operation pending until a test completes it by hand.
    Hold,
}

impl Script {
    pub fn status(status: OperationStatus) -> Self {
        Self::Respond {
            replies: Vec::new(),
            status,
        }
    }

    pub fn success() -> Self {
        Self::status(OperationStatus::success())
    }

    pub fn reply(replies: Vec<Reply>, status: OperationStatus) -> Self {
        Self::Respond { replies, status }
    }
}

/// A submission as recorded by [`ScriptedTransport`].
#[derive(Clone, Debug)]
pub struct Submission {
    pub node: NodeId,
    pub operation: Operation,
}

/// An operation answered with [`Script::Hold`], waiting to be completed.
pub struct HeldOperation {
    pub node: NodeId,
    pub operation: Operation,
    callback: Box<dyn OperationCallback>,
}

impl HeldOperation {
    /// Deliver `replies` then `status`, on the calling thread.
    pub fn complete(self, replies: Vec<Reply>, status: OperationStatus) {
        let mut callback = self.callback;
        for reply in replies {
            callback.received(reply);
        }
        callback.completed(status);
    }
}

impl std::fmt::Debug for HeldOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeldOperation")
            .field("node", &self.node)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

type Responder = Box<dyn Fn(&NodeRef, &Operation) -> Script + Send + Sync>;

/// A transport whose answers come from a closure.
///
/// Every submission is logged. Scripted responses are delivered inline, which
/// makes ordering deterministic; held operations let a test decide exactly
/// when, and in which order, completions happen.
pub struct ScriptedTransport {
    responder: Responder,
    log: Mutex<Vec<Submission>>,
    held: Mutex<Vec<HeldOperation>>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&NodeRef, &Operation) -> Script + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            log: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Answer every operation with `status`.
    pub fn always(status: OperationStatus) -> Self {
        Self::new(move |_, _| Script::status(status.clone()))
    }

    /// Hold every operation.
    pub fn holding() -> Self {
        Self::new(|_, _| Script::Hold)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.log.lock().expect("log lock poisoned").clone()
    }

    pub fn submitted(&self) -> usize {
        self.log.lock().expect("log lock poisoned").len()
    }

    /// Remove and return every held operation, in submission order.
    pub fn take_held(&self) -> Vec<HeldOperation> {
        std::mem::take(&mut *self.held.lock().expect("held lock poisoned"))
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().expect("held lock poisoned").len()
    }
}

impl Transport for ScriptedTransport {
    fn submit(
        &self,
        node: &NodeRef,
        operation: Operation,
        callback: Box<dyn OperationCallback>,
    ) -> OperationHandle {
        let handle = OperationHandle {
            id: operation.id(),
            node: node.id(),
        };
        self.log.lock().expect("log lock poisoned").push(Submission {
            node: node.id(),
            operation: operation.clone(),
        });

        match (self.responder)(node, &operation) {
            Script::Respond { replies, status } => {
                let mut callback = callback;
                for reply in replies {
                    callback.received(reply);
                }
                callback.completed(status);
            }
            Script::Hold => {
                self.held
                    .lock()
                    .expect("held lock poisoned")
                    .push(HeldOperation {
                        node: node.id(),
                        operation,
                        callback,
                    });
            }
        }
        handle
    }
}
