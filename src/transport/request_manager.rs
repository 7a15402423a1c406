use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::lockfree::LockFreeHashMap;
use crate::transport::frame::Frame;

/// Wrapper for oneshot::Sender to make it Clone
#[derive(Clone)]
struct SenderWrapper {
    inner: Arc<Mutex<Option<oneshot::Sender<Frame>>>>,
}

impl SenderWrapper {
    fn new(sender: oneshot::Sender<Frame>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(sender))),
        }
    }

    fn send(self, frame: Frame) -> Result<(), Frame> {
        match self.inner.lock().take() {
            Some(sender) => sender.send(frame),
            None => Err(frame),
        }
    }

    fn same_waiter(&self, other: &SenderWrapper) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Correlates persistent-connection responses with their requests by sequence id.
pub struct RequestManager {
    pending: LockFreeHashMap<i64, SenderWrapper>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            pending: LockFreeHashMap::with_capacity(64),
        }
    }

    /// Register a request, returns the waiter for its response frame.
    /// Registering a sequence id twice replaces the earlier waiter.
    ///
    /// Dropping the waiter before a response arrives unregisters it, so a
    /// caller that is cancelled or times out leaves nothing behind.
    pub fn register(&self, seq_id: i64) -> PendingResponse<'_> {
        let (tx, rx) = oneshot::channel();
        let sender = SenderWrapper::new(tx);
        if self.pending.insert(seq_id, sender.clone()).is_some() {
            tracing::warn!("[REGISTER] Replaced pending request with duplicate seq_id={}", seq_id);
        }
        tracing::debug!("[REGISTER] Request registered: seq_id={}", seq_id);
        PendingResponse {
            manager: self,
            seq_id,
            sender,
            rx,
        }
    }

    /// Complete request
    pub fn complete(&self, frame: Frame) -> bool {
        let seq_id = frame.seq_id;
        match self.pending.remove(&seq_id) {
            Some(sender) => {
                tracing::debug!("[COMPLETE] Response matched: seq_id={}", seq_id);
                sender.send(frame).is_ok()
            }
            None => {
                tracing::warn!("[COMPLETE] No matching request found: seq_id={}", seq_id);
                false
            }
        }
    }

    /// Remove the entry only if it still belongs to `sender`; a newer
    /// registration under the same id is left alone.
    fn abandon(&self, seq_id: i64, sender: &SenderWrapper) {
        if self
            .pending
            .remove_if(&seq_id, |current| current.same_waiter(sender))
            .is_some()
        {
            tracing::debug!("[ABANDON] Waiter dropped before response: seq_id={}", seq_id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending requests (when connection closes). Waiters observe a closed channel.
    pub fn clear(&self) {
        let dropped = self.pending.drain().len();
        if dropped > 0 {
            tracing::debug!("[CLEAR] Dropped {} pending requests", dropped);
        }
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter returned by [`RequestManager::register`]. Resolves to the response
/// frame, or to an error if the connection closed first.
pub struct PendingResponse<'a> {
    manager: &'a RequestManager,
    seq_id: i64,
    sender: SenderWrapper,
    rx: oneshot::Receiver<Frame>,
}

impl PendingResponse<'_> {
    pub fn seq_id(&self) -> i64 {
        self.seq_id
    }
}

impl Future for PendingResponse<'_> {
    type Output = Result<Frame, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx)
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.manager.abandon(self.seq_id, &self.sender);
    }
}
