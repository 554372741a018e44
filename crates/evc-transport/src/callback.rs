use bytes::Bytes;
use evc_types::OperationStatus;

/// A data notification delivered before an operation's terminal status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// A stored value (get, bulk get, get-and-touch).
    Value {
        key: String,
        flags: u32,
        cas: u64,
        data: Bytes,
    },
    /// The CAS token assigned by a write.
    Cas { key: String, cas: u64 },
    /// The post-mutation value of a counter.
    Counter(u64),
}

/// Receives the notifications for one submitted operation.
///
/// The transport calls [`received`](Self::received) zero or more times, then
/// [`completed`](Self::completed) exactly once. Both may run on any transport
/// thread, so implementations must be `Send`.
pub trait OperationCallback: Send + 'static {
    fn received(&mut self, reply: Reply);

    fn completed(self: Box<Self>, status: OperationStatus);
}
