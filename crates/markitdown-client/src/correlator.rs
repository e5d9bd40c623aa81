//! Request/response correlation by JSON-RPC id

use markitdown_core::{MarkitdownError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::types::JsonRpcResponse;

/// Continuation of one in-flight call. Sending consumes it, so a call is
/// settled at most once.
type PendingCall = oneshot::Sender<Result<Value>>;

pub struct RequestCorrelator {
    /// Never decremented; ids are unique for the lifetime of the correlator
    next_id: AtomicU64,
    // Sync lock so `InFlight::drop` can remove entries; never held across an await.
    pending: Mutex<HashMap<u64, PendingCall>>,
}

/// A registered call. Dropping it removes the pending entry, whether the
/// caller got its response, gave up, or had its future cancelled.
pub struct InFlight<'a> {
    correlator: &'a RequestCorrelator,
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl InFlight<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The settlement channel; `&mut` so the registration outlives a timeout.
    pub fn response(&mut self) -> &mut oneshot::Receiver<Result<Value>> {
        &mut self.rx
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.correlator.abandon(self.id) {
            debug!("Request {} abandoned before its response arrived", self.id);
        }
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a call; it settles when [`dispatch`](Self::dispatch) sees the
    /// matching id or the call is failed.
    pub fn register(&self, id: u64) -> InFlight<'_> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        InFlight {
            correlator: self,
            id,
            rx,
        }
    }

    /// Route a response to its caller. Returns false if no call was waiting.
    pub fn dispatch(&self, response: JsonRpcResponse) -> bool {
        let id = response.id();
        let Some(tx) = self.pending().remove(&id) else {
            warn!("Received response for unknown request id {}", id);
            return false;
        };

        if tx.send(response.into_result()).is_err() {
            debug!("Caller for request {} stopped waiting before its response arrived", id);
        }
        true
    }

    /// Forget a call without settling it.
    pub fn abandon(&self, id: u64) -> bool {
        self.pending().remove(&id).is_some()
    }

    /// Reject every outstanding call. Returns how many were rejected.
    pub fn fail_all<F>(&self, reason: F) -> usize
    where
        F: Fn() -> MarkitdownError,
    {
        let drained: Vec<_> = self.pending().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(reason()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
