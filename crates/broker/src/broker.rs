//! Generic async request/response matching by opaque ID.
//!
//! Lifecycle of one request:
//! 1. `wait` registers a single-slot waiter under the request ID and fires
//!    the submit callback;
//! 2. it resolves on the first of: a `respond` for that ID, the timeout, or
//!    cancellation (checked in that order when several are ready);
//! 3. the waiter is unregistered on every exit path, including the future
//!    being dropped.
//!
//! `respond` looks up, removes and sends while holding the map lock, and a
//! timed-out waiter removes its own entry under the same lock. Whichever side
//! removes the entry first wins; if the responder won, the waiter still
//! collects the decision instead of reporting a timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default wait before a pending request expires.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("No pending request for ID: {0}")]
    NoSuchRequest(String),

    #[error("A request with ID {0} is already pending")]
    DuplicateRequest(String),

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("Request {0} was cancelled")]
    Cancelled(String),

    #[error("Request {0} was closed without a response")]
    Closed(String),

    #[error("Invalid response for request {id}: {reason}")]
    InvalidResponse { id: String, reason: String },
}

type SubmitCallback<Req> = Arc<dyn Fn(&str, &Req) + Send + Sync>;

struct Waiter<Resp> {
    seq: u64,
    tx: oneshot::Sender<Resp>,
}

type PendingMap<Resp> = Mutex<HashMap<String, Waiter<Resp>>>;

pub struct CorrelationBroker<Req, Resp> {
    pending: PendingMap<Resp>,
    next_seq: AtomicU64,
    timeout: Duration,
    on_submit: Option<SubmitCallback<Req>>,
}

impl<Req, Resp> CorrelationBroker<Req, Resp>
where
    Resp: Send,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            timeout: DEFAULT_TIMEOUT,
            on_submit: None,
        }
    }

    /// Set the default wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Observe every request as it is registered (e.g. to show a prompt).
    pub fn with_on_submit(mut self, callback: impl Fn(&str, &Req) + Send + Sync + 'static) -> Self {
        self.on_submit = Some(Arc::new(callback));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a response using the default timeout.
    ///
    /// A fresh UUID is used when `id` is `None`.
    pub async fn wait(
        &self,
        id: Option<String>,
        request: Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, BrokerError> {
        self.wait_for(id, request, self.timeout, cancel).await
    }

    /// Wait for a response with an explicit timeout.
    pub async fn wait_for(
        &self,
        id: Option<String>,
        request: Req,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Resp, BrokerError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();

        {
            let mut pending = self.lock();
            if pending.contains_key(&id) {
                return Err(BrokerError::DuplicateRequest(id));
            }
            pending.insert(id.clone(), Waiter { seq, tx });
        }
        // Declared after `rx`, so it runs first on drop.
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
            seq,
        };

        if let Some(callback) = &self.on_submit {
            callback(&id, &request);
        }
        debug!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "Waiting for response");

        let interrupted = tokio::select! {
            biased;
            response = &mut rx => {
                return response.map_err(|_| BrokerError::Closed(id.clone()));
            }
            _ = tokio::time::sleep(timeout) => BrokerError::Timeout {
                id: id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            },
            _ = cancel.cancelled() => BrokerError::Cancelled(id.clone()),
        };

        let still_pending = {
            let mut pending = self.lock();
            let ours = pending.get(&id).is_some_and(|w| w.seq == seq);
            if ours {
                pending.remove(&id);
            }
            ours
        };
        if !still_pending && let Ok(response) = rx.try_recv() {
            debug!(request_id = %id, "Response arrived as the wait expired");
            return Ok(response);
        }

        warn!(request_id = %id, error = %interrupted, "Pending request abandoned");
        Err(interrupted)
    }

    /// Deliver a response to the waiter registered under `id`.
    pub fn respond(&self, id: &str, response: Resp) -> Result<(), BrokerError> {
        let mut pending = self.lock();
        let waiter = pending
            .remove(id)
            .ok_or_else(|| BrokerError::NoSuchRequest(id.to_string()))?;
        // The receiver outlives its map entry, so this only fails if the
        // waiting task was torn down mid-drop.
        waiter
            .tx
            .send(response)
            .map_err(|_| BrokerError::NoSuchRequest(id.to_string()))
    }

    /// IDs of all requests currently waiting, sorted.
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Waiter<Resp>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Req, Resp: Send> Default for CorrelationBroker<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a waiter's entry when its wait ends, however it ends.
///
/// Only the entry this wait registered is removed; a later request that
/// reused the ID is left alone.
struct PendingGuard<'a, Resp> {
    pending: &'a PendingMap<Resp>,
    id: &'a str,
    seq: u64,
}

impl<Resp> Drop for PendingGuard<'_, Resp> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(self.id).is_some_and(|w| w.seq == self.seq) {
            pending.remove(self.id);
        }
    }
}
