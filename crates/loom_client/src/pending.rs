//! Pending-call table
//!
//! Each outstanding request owns one entry keyed by its correlation id. An
//! entry is removed exactly once, by whichever of response, timeout, cancel or
//! disconnect gets there first; later arrivals find nothing and are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use loom_types::{CallId, Value};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub(crate) type Reply = Result<Value, ClientError>;

pub(crate) struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<CallId, oneshot::Sender<Reply>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate a correlation id and its pending entry
    pub(crate) fn register(self: &Arc<Self>) -> PendingCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(id, tx);
        PendingCall {
            id,
            rx,
            table: Arc::downgrade(self),
        }
    }

    /// Deliver the terminal reply for `id`
    ///
    /// Returns false if no call with that id is outstanding.
    pub(crate) fn resolve(&self, id: CallId, reply: Reply) -> bool {
        match self.calls.lock().remove(&id) {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without resolving it
    pub(crate) fn remove(&self, id: CallId) -> bool {
        self.calls.lock().remove(&id).is_some()
    }

    /// Fail every outstanding call
    pub(crate) fn fail_all(&self, error: ClientError) -> usize {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending Call
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to an outstanding request
///
/// Await it from async code or [`wait`](PendingCall::wait) on it from a plain
/// thread. Dropping it before completion cancels the call.
#[must_use = "a pending call does nothing unless awaited or waited on"]
pub struct PendingCall {
    id: CallId,
    rx: oneshot::Receiver<Reply>,
    table: Weak<PendingCalls>,
}

impl PendingCall {
    /// A call that has already failed
    pub(crate) fn failed(error: ClientError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            id: 0,
            rx,
            table: Weak::new(),
        }
    }

    /// Correlation id of this call
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Block the current thread until the call resolves
    ///
    /// Must not be called from an async context: the thread that runs the
    /// transport would be blocked too.
    pub fn wait(self) -> Result<Value, ClientError> {
        futures::executor::block_on(self)
    }

    /// Stop waiting; a no-op if the call already resolved
    pub fn cancel(self) {
        drop(self);
    }
}

impl Future for PendingCall {
    type Output = Result<Value, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err(ClientError::ConnectionClosed)))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            if table.remove(self.id) {
                tracing::trace!(id = self.id, "Cancelled pending call");
            }
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}
